//! Watermark presets and tool configuration
//!
//! Configuration is optional; every field falls back to the defaults below.
//!
//! ```yaml
//! source_mode: presets-or-upload
//! max_transparency: 0.5
//! fetch_timeout_secs: 20
//! presets:
//!   - name: copy-red
//!     url: https://example.com/copy-red.png
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default download name for the finished document
pub const OUTPUT_FILE_NAME: &str = "merged_watermarked.pdf";

/// Content type of the finished document
pub const OUTPUT_CONTENT_TYPE: &str = "application/pdf";

const DEFAULT_PRESET_URLS: [&str; 4] = [
    "https://thrassvent.de/wp-content/uploads/2024/07/COPY-LOGO-1.png",
    "https://thrassvent.de/wp-content/uploads/2024/07/COPY-LOGO-2.png",
    "https://thrassvent.de/wp-content/uploads/2024/07/COPY-LOGO-3.png",
    "https://thrassvent.de/wp-content/uploads/2024/07/COPY-LOGO-4.png",
];

/// A named watermark image URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub url: String,
}

/// Which watermark sources the front end offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceMode {
    /// Only the configured preset URLs
    Presets,
    /// Preset URLs or an uploaded image
    #[default]
    PresetsOrUpload,
}

impl SourceMode {
    pub fn allows_upload(&self) -> bool {
        matches!(self, SourceMode::PresetsOrUpload)
    }
}

/// Tool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Watermark presets, in display order
    pub presets: Vec<Preset>,
    pub source_mode: SourceMode,
    /// Upper bound of the transparency control
    pub max_transparency: f32,
    /// Network timeout for fetching preset images
    pub fetch_timeout_secs: u64,
    pub output_file_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            presets: DEFAULT_PRESET_URLS
                .iter()
                .enumerate()
                .map(|(i, url)| Preset {
                    name: format!("copy-logo-{}", i + 1),
                    url: url.to_string(),
                })
                .collect(),
            source_mode: SourceMode::default(),
            max_transparency: 1.0,
            fetch_timeout_secs: 30,
            output_file_name: OUTPUT_FILE_NAME.to_string(),
        }
    }
}

impl AppConfig {
    /// Parse and validate configuration from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.presets.is_empty() && !self.source_mode.allows_upload() {
            return Err(Error::Config(
                "At least one preset is required when uploads are disabled".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for preset in &self.presets {
            if preset.name.trim().is_empty() {
                return Err(Error::Config("Preset name cannot be empty".to_string()));
            }
            if !seen.insert(preset.name.as_str()) {
                return Err(Error::Config(format!("Duplicate preset name '{}'", preset.name)));
            }
            if !(preset.url.starts_with("https://") || preset.url.starts_with("http://")) {
                return Err(Error::Config(format!(
                    "Preset '{}' has URL '{}' that is not http(s)",
                    preset.name, preset.url
                )));
            }
        }

        if !(self.max_transparency > 0.0 && self.max_transparency <= 1.0) {
            return Err(Error::Config(format!(
                "max_transparency must be in (0, 1], got {}",
                self.max_transparency
            )));
        }

        if self.fetch_timeout_secs == 0 {
            return Err(Error::Config("fetch_timeout_secs must be positive".to_string()));
        }

        if self.output_file_name.trim().is_empty() {
            return Err(Error::Config("output_file_name cannot be empty".to_string()));
        }

        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Look up a preset by exact name or by 1-based position
    pub fn find_preset(&self, key: &str) -> Result<&Preset> {
        if let Some(preset) = self.presets.iter().find(|p| p.name == key) {
            return Ok(preset);
        }

        key.parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.presets.get(i))
            .ok_or_else(|| Error::UnknownPreset(key.to_string()))
    }

    /// Check a transparency value against the configured range
    pub fn check_transparency(&self, transparency: f32) -> Result<()> {
        if !(0.0..=self.max_transparency).contains(&transparency) {
            return Err(Error::Config(format!(
                "Transparency {} is outside the allowed range 0.0..={}",
                transparency, self.max_transparency
            )));
        }
        Ok(())
    }
}

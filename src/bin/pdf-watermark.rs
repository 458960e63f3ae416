//! PDF Watermark CLI tool
//!
//! A command-line tool for merging PDFs and stamping a watermark image on every page.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use glob::glob;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{info, warn};

use pdf_watermark::pdf::{extract_metadata, merge_pdfs, MergeOptions};
use pdf_watermark::{AppConfig, Pipeline, PlacementStyle, WatermarkSource};

/// PDF Watermark - Merge PDFs and overlay a watermark image
#[derive(Parser)]
#[command(name = "pdf-watermark")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Merge PDFs and tile the first preset watermark across every page
    pdf-watermark build --preset 1 *.pdf

    # Use your own logo, centered, mostly transparent
    pdf-watermark build -o handout.pdf --image logo.png --style centered --transparency 0.2 a.pdf b.pdf

    # Preview the watermark page alone
    pdf-watermark overlay -o preview.pdf --preset copy-logo-2 --open")]
struct Cli {
    /// YAML configuration file (presets, allowed sources, limits)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StyleArg {
    Mosaic,
    Centered,
}

impl From<StyleArg> for PlacementStyle {
    fn from(style: StyleArg) -> Self {
        match style {
            StyleArg::Mosaic => PlacementStyle::Mosaic,
            StyleArg::Centered => PlacementStyle::Centered,
        }
    }
}

/// Watermark selection shared by `build` and `overlay`
#[derive(clap::Args)]
struct WatermarkArgs {
    /// Preset watermark, by name or position (see `presets`)
    #[arg(long, conflicts_with = "image")]
    preset: Option<String>,

    /// Watermark image file to use instead of a preset
    #[arg(long)]
    image: Option<PathBuf>,

    /// Watermark layout
    #[arg(long, value_enum, default_value = "mosaic")]
    style: StyleArg,

    /// Watermark opacity from 0.0 (invisible) to 1.0 (opaque)
    #[arg(long, default_value_t = 0.5)]
    transparency: f32,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge PDFs and watermark every page
    Build {
        /// Input PDF files (in order). Supports glob patterns like "*.pdf"
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output PDF file path (defaults to the configured output name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        watermark: WatermarkArgs,

        /// Open the output file after creation
        #[arg(long)]
        open: bool,
    },

    /// Merge multiple PDF files into one
    Merge {
        /// Input PDF files (in order). Supports glob patterns like "*.pdf"
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output PDF file path
        #[arg(short, long)]
        output: PathBuf,

        /// Open the output file after creation
        #[arg(long)]
        open: bool,
    },

    /// Write the watermark overlay page on its own
    Overlay {
        /// Output PDF file path
        #[arg(short, long, default_value = "watermark_overlay.pdf")]
        output: PathBuf,

        #[command(flatten)]
        watermark: WatermarkArgs,

        /// Open the output file after creation
        #[arg(long)]
        open: bool,
    },

    /// List the configured watermark presets
    Presets,

    /// Show information about a PDF file
    Info {
        /// PDF file to inspect
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Build { inputs, output, watermark, open } => {
            cmd_build(config, inputs, output, watermark, open)
        }
        Commands::Merge { inputs, output, open } => cmd_merge(inputs, output, open),
        Commands::Overlay { output, watermark, open } => {
            cmd_overlay(config, output, watermark, open)
        }
        Commands::Presets => cmd_presets(&config),
        Commands::Info { input } => cmd_info(input),
    });

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_level = if verbose { "debug" } else { "info" };

    // Use RUST_LOG if set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pdf_watermark={}", default_level)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false).compact())
        .with(filter)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}

/// Expand glob patterns in input paths
///
/// Literal paths keep their command-line order; the matches of each glob
/// pattern are sorted.
fn expand_globs(patterns: Vec<String>) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for pattern in patterns {
        // Check if pattern contains glob characters
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let mut matched = Vec::new();
            for entry in glob(&pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))? {
                match entry {
                    Ok(path) => matched.push(path),
                    Err(e) => warn!("glob error for {}: {}", pattern, e),
                }
            }
            if matched.is_empty() {
                bail!("No files matched pattern: {}", pattern);
            }
            matched.sort();
            paths.extend(matched);
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }

    for path in &paths {
        if !path.exists() {
            bail!("Input file not found: {}", path.display());
        }
    }

    Ok(paths)
}

/// Open a file with the system default application
fn open_file(path: &Path) -> Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open")
            .arg(path)
            .spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open")
            .arg(path)
            .spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", &path.display().to_string()])
            .spawn()?;
    }
    Ok(())
}

/// Turn the CLI watermark flags into a validated source
fn watermark_source(pipeline: &Pipeline, args: &WatermarkArgs) -> Result<WatermarkSource> {
    pipeline
        .config()
        .check_transparency(args.transparency)?;

    match (&args.preset, &args.image) {
        (_, Some(image)) => {
            let bytes = std::fs::read(image)
                .with_context(|| format!("Failed to read watermark image {}", image.display()))?;
            Ok(pipeline.upload_source(bytes)?)
        }
        (Some(preset), None) => Ok(pipeline.preset_source(preset)?),
        (None, None) => {
            let first = pipeline
                .config()
                .presets
                .first()
                .context("No presets configured; pass --image")?;
            info!(preset = %first.name, "no watermark chosen, using first preset");
            Ok(WatermarkSource::Url(first.url.clone()))
        }
    }
}

/// Merge PDFs and watermark every page
fn cmd_build(
    config: AppConfig,
    inputs: Vec<String>,
    output: Option<PathBuf>,
    watermark: WatermarkArgs,
    open: bool,
) -> Result<()> {
    let inputs = expand_globs(inputs)?;
    let output = output.unwrap_or_else(|| PathBuf::from(&config.output_file_name));
    let pipeline = Pipeline::new(config)?;
    let source = watermark_source(&pipeline, &watermark)?;

    let mut documents = Vec::with_capacity(inputs.len());
    for path in &inputs {
        documents.push(std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?);
    }

    info!("Merging and watermarking {} PDF files", inputs.len());
    let pdf = pipeline.run(&documents, &source, watermark.transparency, watermark.style.into())?;

    std::fs::write(&output, pdf).with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Output: {}", output.display());

    if open {
        open_file(&output)?;
    }

    Ok(())
}

/// Merge multiple PDFs into one
fn cmd_merge(inputs: Vec<String>, output: PathBuf, open: bool) -> Result<()> {
    let inputs = expand_globs(inputs)?;

    info!("Merging {} PDF files", inputs.len());

    let options = MergeOptions {
        input_paths: inputs,
        output_path: output.clone(),
    };

    merge_pdfs(&options)?;

    info!("Merged to: {}", output.display());

    if open {
        open_file(&output)?;
    }

    Ok(())
}

/// Write only the watermark overlay page
fn cmd_overlay(config: AppConfig, output: PathBuf, watermark: WatermarkArgs, open: bool) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let source = watermark_source(&pipeline, &watermark)?;

    let overlay = pipeline.render(&source, watermark.transparency, watermark.style.into())?;
    std::fs::write(&output, overlay.to_bytes()?)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!("Overlay with {} placements written to {}", overlay.placements().len(), output.display());

    if open {
        open_file(&output)?;
    }

    Ok(())
}

/// List configured presets
fn cmd_presets(config: &AppConfig) -> Result<()> {
    for (i, preset) in config.presets.iter().enumerate() {
        println!("{}. {}  {}", i + 1, preset.name, preset.url);
    }
    if config.source_mode.allows_upload() {
        println!("Custom images: allowed (--image)");
    } else {
        println!("Custom images: disabled");
    }
    println!("Transparency range: 0.0 - {}", config.max_transparency);
    Ok(())
}

/// Show information about a PDF
fn cmd_info(input: PathBuf) -> Result<()> {
    let metadata = extract_metadata(&input)?;

    println!("File: {}", input.display());
    println!("Pages: {}", metadata.page_count);

    if let Some(size) = metadata.first_page_size {
        println!("Page size: {:.1} x {:.1} pt", size.width.pt(), size.height.pt());
    }
    if let Some(title) = metadata.title {
        println!("Title: {}", title);
    }
    if let Some(author) = metadata.author {
        println!("Author: {}", author);
    }
    if let Some(producer) = metadata.producer {
        println!("Producer: {}", producer);
    }

    Ok(())
}

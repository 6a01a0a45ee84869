//! meshforge - batch glTF optimization pipeline
//!
//! Walks a model tree, runs each scene document through the configured
//! optimization stages, optionally generates adaptive LOD sets, and writes
//! results under a configurable output layout.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use meshforge::batch::{run_batch, BatchOptions};
use meshforge::config::ForgeConfig;
use meshforge::engine::StandardEngine;
use meshforge::lod;
use meshforge::output::{self, DirectoryLayout, NamingScheme, OutputFormat};

#[derive(Parser)]
#[command(name = "meshforge")]
#[command(about = "Batch glTF optimization pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize every scene file under a source tree
    Batch {
        /// Source directory to walk
        source: PathBuf,

        /// Target directory for outputs
        target: PathBuf,

        /// Path to forge.toml manifest
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Output naming scheme
        #[arg(short, long)]
        naming: Option<NamingScheme>,

        /// Output directory layout
        #[arg(short, long)]
        directory: Option<DirectoryLayout>,

        /// Never overwrite existing output files
        #[arg(long)]
        no_overwrite: bool,

        /// Generate LOD sets for each asset
        #[arg(long)]
        lod: bool,

        /// Explicit LOD levels (e.g. 1.0,0.5,0.25)
        #[arg(long, value_delimiter = ',')]
        levels: Option<Vec<f32>>,

        /// Worker count for parallel processing
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,

        /// Empty the target directory before the run
        #[arg(long)]
        clean: bool,

        /// Disable double-sided rendering on all materials
        #[arg(long)]
        single_sided: bool,
    },

    /// Optimize a single file
    Optimize {
        /// Input glTF/GLB file
        input: PathBuf,

        /// Output file (default: <input stem>_optimized.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Path to forge.toml manifest
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Generate a LOD set next to the output
        #[arg(long)]
        lod: bool,
    },

    /// Validate a manifest without processing anything
    Check {
        /// Path to forge.toml manifest
        #[arg(default_value = "forge.toml")]
        config: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<ForgeConfig> {
    match path {
        Some(path) => Ok(ForgeConfig::load(path)?),
        None => Ok(ForgeConfig::default()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Batch {
            source,
            target,
            config,
            format,
            naming,
            directory,
            no_overwrite,
            lod,
            levels,
            jobs,
            clean,
            single_sided,
        } => {
            let config = load_config(config.as_deref())?;

            let mut output_config = config.output();
            if let Some(format) = format {
                output_config.format = format;
            }
            if let Some(naming) = naming {
                output_config.naming = naming;
            }
            if let Some(directory) = directory {
                output_config.directory = directory;
            }
            if no_overwrite {
                output_config.overwrite = false;
            }

            let options = BatchOptions {
                pipeline: config.pipeline()?,
                output: output_config,
                formats: config.formats,
                generate_lod: lod || config.lod.enabled,
                lod_levels: levels.or_else(|| config.lod.levels.clone()),
                jobs: jobs.max(1),
                clean,
                double_sided: single_sided.then_some(false),
            };
            let engine = StandardEngine::new(config.texture.clone());

            let stats = run_batch(&source, &target, &options, &engine)?;

            println!();
            println!(
                "Processed {} files, {} failed in {:.2}s",
                stats.processed,
                stats.failed,
                stats.duration.as_secs_f64()
            );

            Ok(if stats.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }

        Commands::Optimize {
            input,
            output,
            config,
            lod: generate_lod,
        } => {
            let config = load_config(config.as_deref())?;
            let pipeline = config.pipeline()?;
            let engine = StandardEngine::new(config.texture.clone());

            let output_path = output.unwrap_or_else(|| default_output_path(&input));
            tracing::info!("optimizing {} -> {}", input.display(), output_path.display());

            let mut doc = scene_doc::read_document(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            pipeline.execute(&mut doc, &engine)?;

            let formats = config.formats;
            let file_format = match output_path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .as_deref()
            {
                Some("glb") => output::FileFormat::Glb,
                _ => output::FileFormat::Gltf,
            };
            scene_doc::write_document(&output_path, &doc, &formats.write_options(file_format))
                .with_context(|| format!("failed to write {}", output_path.display()))?;

            if generate_lod || config.lod.enabled {
                let variants = lod::generate_lods(&doc, config.lod.levels.as_deref(), &engine)?;
                lod::write_lod_set(&variants, &output_path)?;
            }

            println!("Done: {}", output_path.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Check { config } => {
            let parsed = ForgeConfig::load(&config)?;
            let pipeline = parsed.pipeline()?;
            if let Some(levels) = &parsed.lod.levels {
                // Exercise level validation without generating anything.
                lod::generate_lods(
                    &scene_doc::SceneDocument::default(),
                    Some(levels),
                    &StandardEngine::default(),
                )?;
            }
            println!(
                "Manifest {} is valid ({} stages)",
                config.display(),
                pipeline.stages().len()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asset".to_string());
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("glb");
    input.with_file_name(format!("{}_optimized.{}", stem, ext))
}

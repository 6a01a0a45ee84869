//! Output layout resolution
//!
//! Maps one optimized document to the physical files it should be written to,
//! under the configured format/naming/directory scheme, and performs the
//! writes with per-format failure isolation.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Deserialize;

use scene_doc::{DocError, SceneDocument, WriteOptions};

/// Requested output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Glb,
    Gltf,
    Both,
    /// Keep the input file's format.
    Preserve,
}

/// Output file naming scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NamingScheme {
    Preserve,
    Suffix,
    Custom,
}

/// Output directory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryLayout {
    Mixed,
    /// Group outputs into one subdirectory per format.
    Separate,
}

/// A concrete file format resolved from `OutputFormat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Glb,
    Gltf,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Glb => "glb",
            FileFormat::Gltf => "gltf",
        }
    }

    pub fn name(&self) -> &'static str {
        self.extension()
    }
}

/// Validated output configuration, immutable for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub naming: NamingScheme,
    pub directory: DirectoryLayout,
    pub overwrite: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Preserve,
            naming: NamingScheme::Preserve,
            directory: DirectoryLayout::Mixed,
            overwrite: true,
        }
    }
}

/// Partial configuration from flags or a manifest, overlaid on the defaults.
/// Enum fields are typed, so invalid values are rejected at parse time,
/// before this ever reaches `merge`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputOverrides {
    pub format: Option<OutputFormat>,
    pub naming: Option<NamingScheme>,
    pub directory: Option<DirectoryLayout>,
    pub overwrite: Option<bool>,
}

impl OutputOverrides {
    pub fn merge(self, defaults: OutputConfig) -> OutputConfig {
        OutputConfig {
            format: self.format.unwrap_or(defaults.format),
            naming: self.naming.unwrap_or(defaults.naming),
            directory: self.directory.unwrap_or(defaults.directory),
            overwrite: self.overwrite.unwrap_or(defaults.overwrite),
        }
    }
}

/// Per-format writer settings (passed through opaquely to document I/O).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FormatSettings {
    /// GLB: pack everything into the single binary container.
    pub glb_binary: bool,
    /// glTF: pretty-print the JSON.
    pub gltf_pretty: bool,
    /// glTF: embed images into the buffer instead of separate files.
    pub gltf_embed_images: bool,
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            glb_binary: true,
            gltf_pretty: true,
            gltf_embed_images: false,
        }
    }
}

impl FormatSettings {
    pub fn write_options(&self, format: FileFormat) -> WriteOptions {
        match format {
            FileFormat::Glb => WriteOptions {
                binary: self.glb_binary,
                pretty: false,
                embed_images: true,
            },
            FileFormat::Gltf => WriteOptions {
                binary: false,
                pretty: self.gltf_pretty,
                embed_images: self.gltf_embed_images,
            },
        }
    }
}

/// One resolved output target.
#[derive(Debug, Clone)]
pub struct ResolvedOutput {
    pub path: PathBuf,
    pub format: FileFormat,
    pub write_options: WriteOptions,
    /// Target exists and overwrite is disabled; the caller must not write it.
    pub skip: bool,
}

/// Infer the single output format for `preserve` from the input extension.
fn preserved_format(input_path: &Path) -> FileFormat {
    match input_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("glb") => FileFormat::Glb,
        _ => FileFormat::Gltf,
    }
}

/// Resolve the output paths for one input file.
///
/// `relative_path` is the input's path relative to the source root and
/// controls where the output lands below `output_root`.
pub fn resolve_outputs(
    input_path: &Path,
    output_root: &Path,
    relative_path: &Path,
    config: &OutputConfig,
    formats: &FormatSettings,
) -> Vec<ResolvedOutput> {
    let file_formats: Vec<FileFormat> = match config.format {
        OutputFormat::Glb => vec![FileFormat::Glb],
        OutputFormat::Gltf => vec![FileFormat::Gltf],
        OutputFormat::Both => vec![FileFormat::Glb, FileFormat::Gltf],
        OutputFormat::Preserve => vec![preserved_format(input_path)],
    };

    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asset".to_string());
    let relative_dir = relative_path.parent().unwrap_or_else(|| Path::new(""));

    file_formats
        .into_iter()
        .map(|format| {
            let file_name = match config.naming {
                NamingScheme::Preserve => format!("{}.{}", stem, format.extension()),
                NamingScheme::Suffix => {
                    format!("{}_{}.{}", stem, format.name(), format.extension())
                }
                NamingScheme::Custom => format!("{}_optimized.{}", stem, format.extension()),
            };

            let path = match config.directory {
                DirectoryLayout::Mixed => output_root.join(relative_dir).join(&file_name),
                DirectoryLayout::Separate => output_root
                    .join(format.name())
                    .join(relative_dir)
                    .join(&file_name),
            };

            let skip = path.exists() && !config.overwrite;
            ResolvedOutput {
                path,
                format,
                write_options: formats.write_options(format),
                skip,
            }
        })
        .collect()
}

/// Result of writing one document to its resolved targets. Formats succeed
/// and fail independently; a failure never rolls back earlier writes.
#[derive(Debug, Default)]
pub struct OutputReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, DocError)>,
}

impl OutputReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Write the document to every resolved output that is not skip-tagged.
pub fn write_outputs(doc: &SceneDocument, outputs: &[ResolvedOutput]) -> OutputReport {
    let mut report = OutputReport::default();

    for output in outputs {
        if output.skip {
            tracing::info!("skipping existing file: {}", output.path.display());
            report.skipped.push(output.path.clone());
            continue;
        }

        match scene_doc::write_document(&output.path, doc, &output.write_options) {
            Ok(()) => {
                tracing::info!(
                    "wrote {}: {}",
                    output.format.name().to_uppercase(),
                    output.path.display()
                );
                report.written.push(output.path.clone());
            }
            Err(err) => {
                tracing::error!(
                    "failed to write {}: {}: {}",
                    output.format.name().to_uppercase(),
                    output.path.display(),
                    err
                );
                report.failed.push((output.path.clone(), err));
            }
        }
    }

    report
}

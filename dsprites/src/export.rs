//! Splitting the image array of a dSprites archive into chunk files.

use crate::{
    config::{ExportConfig, OutputFormat},
    error::{ChunkFileError, ExportError},
};
use dsprites_core::{data::ChunkPlan, numpy::NpzArchive, tensor::Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// What an export run wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub plan: ChunkPlan,
    /// Shape of one sample, e.g. `[64, 64]`.
    pub sample_shape: Vec<usize>,
    /// Chunk files in chunk order.
    pub files: Vec<PathBuf>,
}

/// Reads `config.field` out of `config.archive`, decompressing it fully.
pub fn load_field(config: &ExportConfig) -> Result<Tensor<u8>, ExportError> {
    info!(
        archive = %config.archive.display(),
        field = %config.field,
        mmap = config.mmap,
        "loading archive"
    );
    let images = if config.mmap {
        NpzArchive::open_mmap(&config.archive)?.read::<u8>(&config.field)?
    } else {
        NpzArchive::open(&config.archive)?.read::<u8>(&config.field)?
    };
    debug!(shape = ?images.shape(), "decoded field");
    Ok(images)
}

/// Loads the configured field and writes it out as `config.chunks` chunk files.
pub fn export(config: &ExportConfig) -> Result<ExportReport, ExportError> {
    if config.chunks == 0 {
        return Err(ExportError::ZeroChunks);
    }
    let images = load_field(config)?;
    export_tensor(&images, config)
}

/// Writes `images` split along its leading dimension into `config.chunks` files.
///
/// Every chunk holds `samples / chunks` rows. Trailing rows that do not fill a
/// whole chunk are not written anywhere. Existing files are overwritten.
pub fn export_tensor(
    images: &Tensor<u8>,
    config: &ExportConfig,
) -> Result<ExportReport, ExportError> {
    let plan = ChunkPlan::for_tensor(images, config.chunks)?;
    info!(
        samples = plan.sample_count(),
        chunks = plan.chunk_count(),
        slice_size = plan.slice_size(),
        "splitting field"
    );
    let dropped = plan.dropped();
    if !dropped.is_empty() {
        warn!(
            "{} trailing samples ({:?}) are not part of any chunk",
            dropped.len(),
            dropped
        );
    }

    fs::create_dir_all(&config.output_dir).map_err(|source| ExportError::CreateDir {
        path: config.output_dir.clone(),
        source,
    })?;

    let bar = progress_bar(config.progress, plan.chunk_count() as u64);
    let mut files = Vec::with_capacity(plan.chunk_count());
    for (i, chunk) in plan.chunks(images).enumerate() {
        let chunk = chunk?.to_standalone();
        let path = config.chunk_path(i);
        debug!(path = %path.display(), rows = ?plan.range(i), "writing chunk");
        save_chunk(&chunk, config.format, &path).map_err(|source| ExportError::Write {
            path: path.clone(),
            source,
        })?;
        files.push(path);
        bar.inc(1);
    }
    bar.finish_and_clear();

    info!(
        files = files.len(),
        output_dir = %config.output_dir.display(),
        "export complete"
    );
    Ok(ExportReport {
        plan,
        sample_shape: images.shape()[1..].to_vec(),
        files,
    })
}

pub(crate) fn save_chunk(
    chunk: &Tensor<u8>,
    format: OutputFormat,
    path: &Path,
) -> Result<(), ChunkFileError> {
    match format {
        OutputFormat::Pt => chunk.save_pt(path)?,
        #[cfg(feature = "safetensors")]
        OutputFormat::Safetensors => {
            chunk.save_safetensors(crate::config::SAFETENSORS_KEY, path)?
        }
    }
    Ok(())
}

pub(crate) fn load_chunk(format: OutputFormat, path: &Path) -> Result<Tensor<u8>, ChunkFileError> {
    Ok(match format {
        OutputFormat::Pt => Tensor::load_pt(path)?,
        #[cfg(feature = "safetensors")]
        OutputFormat::Safetensors => {
            Tensor::load_safetensors(path, crate::config::SAFETENSORS_KEY)?
        }
    })
}

pub(crate) fn progress_bar(enabled: bool, len: u64) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] {wide_bar} {pos}/{len}") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

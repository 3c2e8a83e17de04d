use crate::{
    config::ExportConfig,
    error::VerifyError,
    export::{load_chunk, load_field, progress_bar},
};
use dsprites_core::{data::ChunkPlan, tensor::Tensor};
use tracing::{debug, info};

/// Checks the chunk files `config` describes against the archive they came from.
/// Returns the number of chunks checked.
pub fn verify(config: &ExportConfig) -> Result<usize, VerifyError> {
    let images = load_field(config)?;
    verify_tensor(&images, config)
}

/// Reads every chunk file back and compares it with the rows of `images` it covers.
/// Stops at the first chunk that does not match.
pub fn verify_tensor(images: &Tensor<u8>, config: &ExportConfig) -> Result<usize, VerifyError> {
    let plan = ChunkPlan::for_tensor(images, config.chunks)?;
    let bar = progress_bar(config.progress, plan.chunk_count() as u64);
    for (i, (path, expected)) in config.chunk_paths().zip(plan.chunks(images)).enumerate() {
        let expected = expected?;
        let found = load_chunk(config.format, &path).map_err(|source| VerifyError::Read {
            path: path.clone(),
            source,
        })?;
        if found.shape() != expected.shape() {
            return Err(VerifyError::ShapeMismatch {
                path,
                expected: expected.shape().to_vec(),
                found: found.shape().to_vec(),
            });
        }
        let row_numel = expected.row_numel().max(1);
        if let Some(pos) = found
            .as_slice()
            .iter()
            .zip(expected.as_slice())
            .position(|(a, b)| a != b)
        {
            return Err(VerifyError::DataMismatch {
                path,
                row: plan.range(i).start + pos / row_numel,
            });
        }
        debug!(path = %path.display(), "chunk matches");
        bar.inc(1);
    }
    bar.finish_and_clear();
    info!(chunks = plan.chunk_count(), "all chunks match the archive");
    Ok(plan.chunk_count())
}

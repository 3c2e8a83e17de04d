use dsprites_core::{data::ChunkError, numpy::NpzError, tensor::ShapeError, torch::TorchError};
use std::path::PathBuf;

/// Errors from writing a single chunk file.
#[derive(Debug)]
pub enum ChunkFileError {
    Torch(TorchError),
    #[cfg(feature = "safetensors")]
    Safetensors(dsprites_core::safetensors::Error),
}

impl std::fmt::Display for ChunkFileError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ChunkFileError::Torch(err) => write!(fmt, "{err}"),
            #[cfg(feature = "safetensors")]
            ChunkFileError::Safetensors(err) => write!(fmt, "{err}"),
        }
    }
}

impl std::error::Error for ChunkFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChunkFileError::Torch(err) => Some(err),
            #[cfg(feature = "safetensors")]
            ChunkFileError::Safetensors(err) => Some(err),
        }
    }
}

impl From<TorchError> for ChunkFileError {
    fn from(e: TorchError) -> Self {
        Self::Torch(e)
    }
}

#[cfg(feature = "safetensors")]
impl From<dsprites_core::safetensors::Error> for ChunkFileError {
    fn from(e: dsprites_core::safetensors::Error) -> Self {
        Self::Safetensors(e)
    }
}

#[derive(Debug)]
pub enum ExportError {
    /// The archive could not be opened, or the field could not be read from it.
    Npz(NpzError),

    /// Asked for zero chunks.
    ZeroChunks,

    /// The field has no leading dimension to split.
    Shape(ShapeError),

    /// The output directory could not be created.
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Writing a chunk failed. Chunks written before it are left in place.
    Write {
        path: PathBuf,
        source: ChunkFileError,
    },
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ExportError::Npz(_) => write!(fmt, "failed to read archive"),
            ExportError::ZeroChunks => write!(fmt, "chunk count must be at least 1"),
            ExportError::Shape(err) => write!(fmt, "{err}"),
            ExportError::CreateDir { path, .. } => {
                write!(fmt, "failed to create {}", path.display())
            }
            ExportError::Write { path, .. } => write!(fmt, "failed to write {}", path.display()),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Npz(err) => Some(err),
            ExportError::ZeroChunks => None,
            ExportError::Shape(err) => Some(err),
            ExportError::CreateDir { source, .. } => Some(source),
            ExportError::Write { source, .. } => Some(source),
        }
    }
}

impl From<NpzError> for ExportError {
    fn from(e: NpzError) -> Self {
        Self::Npz(e)
    }
}

impl From<ShapeError> for ExportError {
    fn from(e: ShapeError) -> Self {
        Self::Shape(e)
    }
}

impl From<ChunkError> for ExportError {
    fn from(e: ChunkError) -> Self {
        match e {
            ChunkError::NoChunks => Self::ZeroChunks,
            ChunkError::Shape(err) => Self::Shape(err),
        }
    }
}

#[derive(Debug)]
pub enum VerifyError {
    /// Reading the source field failed.
    Export(ExportError),

    /// A chunk file could not be read back.
    Read {
        path: PathBuf,
        source: ChunkFileError,
    },

    /// A chunk holds a different number of rows, or rows of a different shape.
    ShapeMismatch {
        path: PathBuf,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// A chunk's contents differ from the archive rows it stands for.
    DataMismatch { path: PathBuf, row: usize },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            VerifyError::Export(_) => write!(fmt, "failed to load reference rows"),
            VerifyError::Read { path, .. } => write!(fmt, "failed to read {}", path.display()),
            VerifyError::ShapeMismatch {
                path,
                expected,
                found,
            } => write!(
                fmt,
                "{}: expected shape {expected:?}, found {found:?}",
                path.display()
            ),
            VerifyError::DataMismatch { path, row } => {
                write!(fmt, "{}: differs from archive row {row}", path.display())
            }
        }
    }
}

impl std::error::Error for VerifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VerifyError::Export(err) => Some(err),
            VerifyError::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ExportError> for VerifyError {
    fn from(e: ExportError) -> Self {
        Self::Export(e)
    }
}

impl From<ChunkError> for VerifyError {
    fn from(e: ChunkError) -> Self {
        Self::Export(e.into())
    }
}

impl From<ShapeError> for VerifyError {
    fn from(e: ShapeError) -> Self {
        Self::Export(e.into())
    }
}

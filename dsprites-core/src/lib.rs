//! # dsprites-core
//!
//! The tensor and file format layer of the dSprites chunk exporter.
//!
//! # Tensors
//!
//! *See [tensor] and [dtypes] for more information.*
//!
//! A [`tensor::Tensor`] is a dense row-major nd-array over a reference
//! counted storage buffer. Slicing the leading dimension with
//! [`tensor::Tensor::narrow()`] is free: the view shares its storage with the
//! tensor it came from, until [`tensor::Tensor::to_standalone()`] copies it
//! out.
//!
//! ```rust
//! # use dsprites_core::prelude::*;
//! let t = Tensor::from_vec((0..8u8).collect(), [4, 1, 2]).unwrap();
//! let view = t.narrow(1..3).unwrap();
//! assert_eq!(view.as_slice(), &[2, 3, 4, 5]);
//! assert!(!view.is_standalone());
//! assert!(view.to_standalone().is_standalone());
//! ```
//!
//! # Formats
//!
//! - [numpy]: `.npy` files and `.npz` archives, including pickled object arrays.
//! - [torch]: the zip container written by `torch.save`.
//! - `safetensors` (feature `safetensors`, on by default).
//! - [pickle]: the subset of Python's pickle the two above rely on.
//!
//! # Chunking
//!
//! [`data::ChunkPlan`] splits a leading dimension into equal chunks,
//! leaving out the remainder.

pub mod data;
pub mod dtypes;
pub mod numpy;
pub mod pickle;
#[cfg(feature = "safetensors")]
pub mod safetensors;
pub mod tensor;
pub mod torch;

/// Contains subset of all public exports.
pub mod prelude {
    pub use crate::data::{ChunkError, ChunkPlan};
    pub use crate::dtypes::{Endian, Unit};
    pub use crate::numpy::{NpyError, NpzArchive, NpzError, NpzWriter, NumpyDtype};
    #[cfg(feature = "safetensors")]
    pub use crate::safetensors::SafeDtype;
    pub use crate::tensor::{ShapeError, Tensor};
    pub use crate::torch::{TorchDtype, TorchError};
}

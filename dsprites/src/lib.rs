//! # dsprites
//!
//! Exports the image array of the
//! [dSprites](https://github.com/deepmind/dsprites-dataset) archive as equally
//! sized tensor files that `torch.load` reads directly.
//!
//! ```no_run
//! use dsprites::{export, ExportConfig};
//! let report = export(&ExportConfig::default()).unwrap();
//! assert_eq!(report.files.len(), 10);
//! ```
//!
//! The `imgs` field of shape `(737280, 64, 64)` becomes `images0.pt` ...
//! `images9.pt`, each holding a `(73728, 64, 64)` `uint8` tensor. When the
//! number of samples is not a multiple of the chunk count, the trailing
//! samples are left out.

pub mod config;
pub mod error;
pub mod export;
pub mod inspect;
pub mod verify;

pub use config::{ExportConfig, OutputFormat};
pub use error::{ChunkFileError, ExportError, VerifyError};
pub use export::{export, export_tensor, load_field, ExportReport};
pub use inspect::{inspect, ArchiveSummary, FieldSummary};
pub use verify::{verify, verify_tensor};

use crate::{dtypes::Unit, tensor::Tensor};
use memmap2::MmapOptions;
use safetensors::{
    serialize_to_file,
    tensor::{Dtype as SDtype, SafeTensors, TensorView},
    SafeTensorError,
};
use std::{collections::BTreeMap, fs::File, path::Path, sync::Arc};

/// Conversion trait for SafeTensors dtype
pub trait SafeDtype: Unit {
    fn safe_dtype() -> SDtype;
}

macro_rules! safe_dtype {
    ($($ty:ty => $dtype:expr),*) => {
        $(
            impl SafeDtype for $ty {
                fn safe_dtype() -> SDtype {
                    $dtype
                }
            }
        )*
    };
}

safe_dtype!(
    u8 => SDtype::U8,
    i8 => SDtype::I8,
    i16 => SDtype::I16,
    i32 => SDtype::I32,
    i64 => SDtype::I64,
    f32 => SDtype::F32,
    f64 => SDtype::F64
);

#[derive(Debug)]
pub enum Error {
    SafeTensorError(SafeTensorError),
    IoError(std::io::Error),
    WrongDtype { expected: SDtype, found: SDtype },
    Shape(crate::tensor::ShapeError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::SafeTensorError(err) => write!(fmt, "{err:?}"),
            Error::IoError(err) => write!(fmt, "{err}"),
            Error::WrongDtype { expected, found } => {
                write!(fmt, "wrong dtype: expected {expected:?} found {found:?}")
            }
            Error::Shape(err) => write!(fmt, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::Shape(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SafeTensorError> for Error {
    fn from(safe_error: SafeTensorError) -> Error {
        Error::SafeTensorError(safe_error)
    }
}

impl From<std::io::Error> for Error {
    fn from(io_error: std::io::Error) -> Error {
        Error::IoError(io_error)
    }
}

impl From<crate::tensor::ShapeError> for Error {
    fn from(e: crate::tensor::ShapeError) -> Error {
        Error::Shape(e)
    }
}

/// Saves `tensor` as the single entry `key` of a `.safetensors` file.
pub fn save_safetensors<E: SafeDtype, P: AsRef<Path>>(
    tensor: &Tensor<E>,
    key: &str,
    path: P,
) -> Result<(), Error> {
    let data = E::encode_le(tensor.as_slice());
    let view = TensorView::new(E::safe_dtype(), tensor.shape().to_vec(), &data)?;
    let mut views = BTreeMap::new();
    views.insert(key.to_string(), view);
    serialize_to_file(&views, &None, path.as_ref())?;
    Ok(())
}

/// Loads entry `key` of the `.safetensors` file at `path`.
pub fn load_safetensors<E: SafeDtype, P: AsRef<Path>>(
    path: P,
    key: &str,
) -> Result<Tensor<E>, Error> {
    let f = File::open(path)?;
    // SAFETY: the file is only read while mapped
    let buffer = unsafe { MmapOptions::new().map(&f)? };
    let tensors = SafeTensors::deserialize(&buffer)?;
    let view = tensors.tensor(key)?;
    if view.dtype() != E::safe_dtype() {
        return Err(Error::WrongDtype {
            expected: E::safe_dtype(),
            found: view.dtype(),
        });
    }
    let data = E::decode_vec(view.data().to_vec(), crate::dtypes::Endian::Little);
    Ok(Tensor::from_storage(
        Arc::new(data),
        0,
        view.shape().to_vec(),
    )?)
}

impl<E: SafeDtype> Tensor<E> {
    /// See [save_safetensors()].
    pub fn save_safetensors<P: AsRef<Path>>(&self, key: &str, path: P) -> Result<(), Error> {
        save_safetensors(self, key, path)
    }

    /// See [load_safetensors()].
    pub fn load_safetensors<P: AsRef<Path>>(path: P, key: &str) -> Result<Self, Error> {
        load_safetensors(path, key)
    }
}

//! Reading & writing tensors in the [.npy](https://numpy.org/devdocs/reference/generated/numpy.lib.format.html)
//! format, and `.npz` archives of them. See [read_npy_data()], [write_npy()] and [NpzArchive].

mod header;
mod npz;
mod object;

pub use header::*;
pub use npz::*;
pub use object::*;

use crate::{
    dtypes::{Endian, Unit},
    pickle::PickleError,
    tensor::{ShapeError, Tensor},
};
use std::io::{self, Read, Write};

const MAGIC_NUMBER: &[u8] = b"\x93NUMPY";

/// Represents the NumpyDtype as a const str value.
///
/// Values should match up to the [numpy documentation](https://numpy.org/doc/stable/reference/arrays.dtypes.html)
/// for dtypes.
///
/// For example an f32's dtype is "f4".
pub trait NumpyDtype: Unit {
    const NUMPY_DTYPE_STR: &'static str;
}

macro_rules! numpy_dtype {
    ($($ty:ty => $s:literal),*) => {
        $(
            impl NumpyDtype for $ty {
                const NUMPY_DTYPE_STR: &'static str = $s;
            }
        )*
    };
}

numpy_dtype!(u8 => "u1", i8 => "i1", i16 => "i2", i32 => "i4", i64 => "i8", f32 => "f4", f64 => "f8");

/// Reads the data that follows `header` in `r`.
///
/// The dtype in the header must be `E`'s dtype; the shape is taken from the header.
pub fn read_npy_data<E: NumpyDtype, R: Read>(
    r: &mut R,
    header: &NpyHeader,
) -> Result<Tensor<E>, NpyError> {
    if header.fortran_order {
        return Err(NpyError::FortranOrderUnsupported);
    }
    if header.dtype != E::NUMPY_DTYPE_STR {
        return Err(NpyError::WrongDtype {
            expected: E::NUMPY_DTYPE_STR,
            found: header.descr(),
        });
    }
    let num_bytes = header
        .numel()
        .and_then(|n| n.checked_mul(E::NUM_BYTES))
        .ok_or(NpyError::HeaderInvalidShape)?;
    let mut bytes = std::vec![0u8; num_bytes];
    r.read_exact(&mut bytes)?;
    let data = E::decode_vec(bytes, header.endian);
    Ok(Tensor::from_vec(data, header.shape.clone())?)
}

/// Writes `tensor` as a little endian, C-ordered `.npy` stream.
pub fn write_npy<E: NumpyDtype, W: Write>(w: &mut W, tensor: &Tensor<E>) -> io::Result<()> {
    write_header(
        w,
        &NpyHeader {
            dtype: E::NUMPY_DTYPE_STR.into(),
            endian: Endian::Little,
            fortran_order: false,
            shape: tensor.shape().to_vec(),
        },
    )?;
    for block in tensor.as_slice().chunks(1 << 16) {
        w.write_all(&E::encode_le(block))?;
    }
    Ok(())
}

#[derive(Debug)]
pub enum NpyError {
    /// Magic number did not match the expected value.
    InvalidMagicNumber([u8; 6]),

    // Version did not match the expected value.
    InvalidVersion([u8; 2]),

    /// Error from opening a file, reading values, etc.
    IoError(io::Error),

    /// Error from converting header bytes to a [String].
    Utf8Error(std::str::Utf8Error),

    /// Error from convert header [String] into a [py_literal::Value].
    PyLiteral(py_literal::ParseError),

    /// The header is not a python dictionary.
    HeaderNotADict,

    /// The header dictionary is missing the "descr" key.
    HeaderMissingDescr,

    /// The header dictionary is missing the "fortran_order" key.
    HeaderMissingFortranOrder,

    /// The header dictionary is missing the "shape" key.
    HeaderMissingShape,

    /// The header dictionary value for "descr" is invalid in some way.
    HeaderInvalidDescr,

    /// The header dictionary value for "fortran_order" is invalid in some way.
    HeaderInvalidFortranOrder,

    /// The header dictionary value for "shape" is invalid in some way.
    HeaderInvalidShape,

    /// Arrays stored in fortran order are not supported.
    FortranOrderUnsupported,

    /// Unexpected alignment for [Endian].
    InvalidAlignment,

    /// The dtype from the header is not what was expected.
    WrongDtype {
        expected: &'static str,
        found: String,
    },

    /// Data does not fit the shape from the header.
    Shape(ShapeError),

    /// The pickled payload of an object array could not be read.
    Pickle(PickleError),

    /// The pickled payload is not a numpy array.
    NotAnObjectArray,
}

impl std::fmt::Display for NpyError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NpyError::InvalidMagicNumber(num) => write!(fmt, "invalid magic number: {num:?}"),
            NpyError::InvalidVersion(ver) => write!(fmt, "invalid version: {ver:?}"),
            NpyError::IoError(err) => write!(fmt, "{err}"),
            NpyError::Utf8Error(err) => write!(fmt, "{err}"),
            NpyError::PyLiteral(err) => write!(fmt, "invalid header literal: {err}"),
            NpyError::HeaderNotADict => write!(fmt, "header is not a dict"),
            NpyError::HeaderMissingDescr => write!(fmt, "header is missing 'descr'"),
            NpyError::HeaderMissingFortranOrder => {
                write!(fmt, "header is missing 'fortran_order'")
            }
            NpyError::HeaderMissingShape => write!(fmt, "header is missing 'shape'"),
            NpyError::HeaderInvalidDescr => write!(fmt, "invalid 'descr' in header"),
            NpyError::HeaderInvalidFortranOrder => {
                write!(fmt, "invalid 'fortran_order' in header")
            }
            NpyError::HeaderInvalidShape => write!(fmt, "invalid 'shape' in header"),
            NpyError::FortranOrderUnsupported => {
                write!(fmt, "fortran ordered arrays are unsupported")
            }
            NpyError::InvalidAlignment => write!(fmt, "invalid alignment"),
            NpyError::WrongDtype { expected, found } => {
                write!(fmt, "wrong dtype: expected {expected} found {found}")
            }
            NpyError::Shape(err) => write!(fmt, "{err}"),
            NpyError::Pickle(err) => write!(fmt, "{err}"),
            NpyError::NotAnObjectArray => write!(fmt, "pickled payload is not a numpy array"),
        }
    }
}

impl std::error::Error for NpyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NpyError::IoError(err) => Some(err),
            NpyError::Utf8Error(err) => Some(err),
            NpyError::Shape(err) => Some(err),
            NpyError::Pickle(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for NpyError {
    fn from(e: io::Error) -> Self {
        Self::IoError(e)
    }
}

impl From<std::str::Utf8Error> for NpyError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::Utf8Error(e)
    }
}

impl From<py_literal::ParseError> for NpyError {
    fn from(e: py_literal::ParseError) -> Self {
        Self::PyLiteral(e)
    }
}

impl From<ShapeError> for NpyError {
    fn from(e: ShapeError) -> Self {
        Self::Shape(e)
    }
}

impl From<PickleError> for NpyError {
    fn from(e: PickleError) -> Self {
        Self::Pickle(e)
    }
}

use super::{NpyError, MAGIC_NUMBER};
use crate::{dtypes::Endian, tensor::checked_numel};
use num_traits::ToPrimitive;
use std::io::{self, Read, Write};

/// The parsed header dictionary of a `.npy` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    /// Type part of `descr` without the byte order character, e.g. `u1` or `f8`.
    pub dtype: String,
    pub endian: Endian,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
}

impl NpyHeader {
    /// Number of elements, `None` if the shape overflows `usize`.
    pub fn numel(&self) -> Option<usize> {
        checked_numel(&self.shape)
    }

    /// Size of one element in bytes, `None` for object arrays.
    pub fn item_size(&self) -> Option<usize> {
        self.dtype.get(1..)?.parse().ok()
    }

    pub fn is_object(&self) -> bool {
        self.dtype == "O"
    }

    /// The full `descr` string, e.g. `|u1` or `<f8`.
    pub fn descr(&self) -> String {
        let order = match self.item_size() {
            None | Some(1) => '|',
            Some(_) => match self.endian {
                Endian::Big => '>',
                Endian::Little => '<',
                Endian::Native => '=',
            },
        };
        std::format!("{order}{}", self.dtype)
    }
}

pub(crate) fn to_shape_str(shape: &[usize]) -> String {
    shape
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<String>>()
        .join(", ")
        + if shape.len() == 1 { "," } else { "" }
}

/// Writes a version 1.0 header, padded so the data starts on a 64 byte boundary.
pub fn write_header<W: Write>(w: &mut W, header: &NpyHeader) -> io::Result<()> {
    let mut buf: Vec<u8> = Vec::new();
    write!(
        &mut buf,
        "{{'descr': '{}', 'fortran_order': {}, 'shape': ({}), }}",
        header.descr(),
        if header.fortran_order {
            "True"
        } else {
            "False"
        },
        to_shape_str(&header.shape),
    )?;

    // padding
    while (MAGIC_NUMBER.len() + 4 + buf.len() + 1) % 64 != 0 {
        buf.write_all(b"\x20")?;
    }

    // new line termination
    buf.write_all(b"\n")?;

    let len = u16::try_from(buf.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "npy header too long"))?;

    w.write_all(MAGIC_NUMBER)?; // magic number
    w.write_all(&[1, 0])?; // version major & minor
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&buf)?;
    Ok(())
}

/// Reads the magic number, version and header dictionary from `r`, leaving `r`
/// positioned at the start of the data.
pub fn read_header<R: Read>(r: &mut R) -> Result<NpyHeader, NpyError> {
    let mut magic = [0; 6];
    r.read_exact(&mut magic)?;
    if magic != MAGIC_NUMBER {
        return Err(NpyError::InvalidMagicNumber(magic));
    }

    let mut version = [0; 2];
    r.read_exact(&mut version)?;
    let header_len = match version[0] {
        1 => {
            let mut b = [0; 2];
            r.read_exact(&mut b)?;
            u16::from_le_bytes(b) as usize
        }
        2 | 3 => {
            let mut b = [0; 4];
            r.read_exact(&mut b)?;
            u32::from_le_bytes(b) as usize
        }
        _ => return Err(NpyError::InvalidVersion(version)),
    };

    let mut header_bytes: Vec<u8> = std::vec![0; header_len];
    r.read_exact(&mut header_bytes)?;
    let header = std::str::from_utf8(&header_bytes)?;
    parse_header(header)
}

fn parse_header(header: &str) -> Result<NpyHeader, NpyError> {
    let py_header: py_literal::Value = header.trim().parse()?;
    let items = py_header.as_dict().ok_or(NpyError::HeaderNotADict)?;

    let mut descr = None;
    let mut shape = None;
    let mut fortran_order = None;
    for (key, value) in items.iter() {
        if key == &py_literal::Value::String("descr".into()) {
            descr = Some(value);
        }
        if key == &py_literal::Value::String("shape".into()) {
            shape = Some(value);
        }
        if key == &py_literal::Value::String("fortran_order".into()) {
            fortran_order = Some(value);
        }
    }

    let descr = descr.ok_or(NpyError::HeaderMissingDescr)?;
    let fortran_order = fortran_order.ok_or(NpyError::HeaderMissingFortranOrder)?;
    let shape = shape.ok_or(NpyError::HeaderMissingShape)?;

    let fortran_order = match fortran_order {
        py_literal::Value::Boolean(b) => *b,
        _ => return Err(NpyError::HeaderInvalidFortranOrder),
    };

    let descr = descr.as_string().ok_or(NpyError::HeaderInvalidDescr)?;
    let mut chars = descr.chars();
    let endian = match chars.next() {
        Some('>') => Endian::Big,
        Some('<') => Endian::Little,
        Some('=') | Some('|') => Endian::Native,
        _ => return Err(NpyError::InvalidAlignment),
    };
    let dtype: String = chars.collect();
    if dtype.is_empty() {
        return Err(NpyError::HeaderInvalidDescr);
    }

    let shape_values = shape.as_tuple().ok_or(NpyError::HeaderInvalidShape)?;
    let mut shape = Vec::with_capacity(shape_values.len());
    for item in shape_values.iter() {
        let v = match item {
            py_literal::Value::Integer(value) => value.to_usize(),
            _ => None,
        };
        shape.push(v.ok_or(NpyError::HeaderInvalidShape)?);
    }

    Ok(NpyHeader {
        dtype,
        endian,
        fortran_order,
        shape,
    })
}

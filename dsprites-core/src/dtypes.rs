//! Element types that can live inside a [crate::tensor::Tensor].
//!
//! Every format module has its own small trait on top of [Unit] that maps the
//! rust type to the name the format uses for it (e.g. `u1` for numpy,
//! `ByteStorage` for torch).

/// Byte order of serialized numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
    Native,
}

/// A plain number that can be stored in a tensor and moved to and from raw bytes.
pub trait Unit:
    'static + Copy + Clone + Default + std::fmt::Debug + PartialEq + Send + Sync
{
    /// Size of one element in bytes.
    const NUM_BYTES: usize;

    /// Decodes a single element from exactly [Unit::NUM_BYTES] bytes.
    fn from_bytes(bytes: &[u8], endian: Endian) -> Self;

    /// Appends the little endian encoding of `self` to `out`.
    fn extend_le_bytes(&self, out: &mut Vec<u8>);

    /// Decodes a whole buffer of elements. The buffer length must be a multiple
    /// of [Unit::NUM_BYTES]; trailing bytes are ignored.
    fn decode_vec(bytes: Vec<u8>, endian: Endian) -> Vec<Self> {
        bytes
            .chunks_exact(Self::NUM_BYTES)
            .map(|b| Self::from_bytes(b, endian))
            .collect()
    }

    /// Encodes a slice of elements as little endian bytes.
    fn encode_le(data: &[Self]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() * Self::NUM_BYTES);
        for v in data.iter() {
            v.extend_le_bytes(&mut out);
        }
        out
    }
}

impl Unit for u8 {
    const NUM_BYTES: usize = 1;

    fn from_bytes(bytes: &[u8], _: Endian) -> Self {
        bytes[0]
    }

    fn extend_le_bytes(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }

    fn decode_vec(bytes: Vec<u8>, _: Endian) -> Vec<Self> {
        bytes
    }

    fn encode_le(data: &[Self]) -> Vec<u8> {
        data.to_vec()
    }
}

macro_rules! multibyte_unit {
    ($($ty:ty),*) => {
        $(
            impl Unit for $ty {
                const NUM_BYTES: usize = std::mem::size_of::<$ty>();

                fn from_bytes(bytes: &[u8], endian: Endian) -> Self {
                    let mut buf = [0; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(&bytes[..Self::NUM_BYTES]);
                    match endian {
                        Endian::Big => Self::from_be_bytes(buf),
                        Endian::Little => Self::from_le_bytes(buf),
                        Endian::Native => Self::from_ne_bytes(buf),
                    }
                }

                fn extend_le_bytes(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

multibyte_unit!(i8, i16, i32, i64, f32, f64);

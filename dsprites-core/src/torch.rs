//! Saving & loading tensors in PyTorch's zip container (`torch.save(t, f,
//! _use_new_zipfile_serialization=True)`).
//!
//! A `.pt` file is a zip archive with every record stored uncompressed under a
//! common `<archive_name>/` prefix:
//! - `data.pkl` - a pickle describing the call that rebuilds the tensor
//! - `byteorder` - `little` or `big`
//! - `data/<key>` - the raw bytes of each storage
//! - `version` - the container format version
//!
//! Like PyTorch, the *whole* storage of a tensor is written along with the
//! tensor's offset into it. Saving a view of a large tensor therefore saves
//! the large tensor; use [Tensor::to_standalone()] first to avoid that.

use crate::{
    dtypes::{Endian, Unit},
    pickle::{self, PickleError, Value},
    tensor::{contiguous_strides, ShapeError, Tensor},
};
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Seek, Write},
    path::Path,
    sync::Arc,
};
use zip::{result::ZipError, write::FileOptions, CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// Alignment of every record's data inside the archive, matching PyTorch.
const RECORD_ALIGNMENT: u16 = 64;

const FORMAT_VERSION: &str = "3\n";

/// Maps an element type to the name of its legacy storage class in `torch`.
pub trait TorchDtype: Unit {
    const STORAGE_TYPE: &'static str;
}

macro_rules! torch_dtype {
    ($($ty:ty => $s:literal),*) => {
        $(
            impl TorchDtype for $ty {
                const STORAGE_TYPE: &'static str = $s;
            }
        )*
    };
}

torch_dtype!(
    u8 => "ByteStorage",
    i8 => "CharStorage",
    i16 => "ShortStorage",
    i32 => "IntStorage",
    i64 => "LongStorage",
    f32 => "FloatStorage",
    f64 => "DoubleStorage"
);

#[derive(Debug)]
pub enum TorchError {
    /// Error from opening a file, reading or writing records.
    IoError(io::Error),

    /// Something went wrong with the `.zip` container.
    Zip(ZipError),

    /// `data.pkl` could not be unpickled.
    Pickle(PickleError),

    /// The tensor does not fit its storage.
    Shape(ShapeError),

    /// The archive has no record with this name.
    MissingRecord(String),

    /// `data.pkl` does not describe a single tensor.
    UnexpectedPickle(&'static str),

    /// The storage class in the archive does not match the requested dtype.
    WrongDtype {
        expected: &'static str,
        found: String,
    },

    /// Only C-contiguous tensors can be loaded.
    NonContiguous {
        shape: Vec<usize>,
        strides: Vec<usize>,
    },

    /// A size or offset does not fit into a pickle integer.
    IndexOverflow(usize),
}

impl std::fmt::Display for TorchError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TorchError::IoError(err) => write!(fmt, "{err}"),
            TorchError::Zip(err) => write!(fmt, "{err}"),
            TorchError::Pickle(err) => write!(fmt, "invalid data.pkl: {err}"),
            TorchError::Shape(err) => write!(fmt, "{err}"),
            TorchError::MissingRecord(name) => write!(fmt, "missing record '{name}'"),
            TorchError::UnexpectedPickle(what) => write!(fmt, "unexpected data.pkl: {what}"),
            TorchError::WrongDtype { expected, found } => {
                write!(fmt, "wrong storage type: expected {expected} found {found}")
            }
            TorchError::NonContiguous { shape, strides } => {
                write!(
                    fmt,
                    "non-contiguous tensor: shape {shape:?} strides {strides:?}"
                )
            }
            TorchError::IndexOverflow(v) => write!(fmt, "{v} does not fit in 64 bits"),
        }
    }
}

impl std::error::Error for TorchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TorchError::IoError(err) => Some(err),
            TorchError::Zip(err) => Some(err),
            TorchError::Pickle(err) => Some(err),
            TorchError::Shape(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TorchError {
    fn from(e: io::Error) -> Self {
        Self::IoError(e)
    }
}

impl From<ZipError> for TorchError {
    fn from(e: ZipError) -> Self {
        Self::Zip(e)
    }
}

impl From<PickleError> for TorchError {
    fn from(e: PickleError) -> Self {
        Self::Pickle(e)
    }
}

impl From<ShapeError> for TorchError {
    fn from(e: ShapeError) -> Self {
        Self::Shape(e)
    }
}

fn int(v: usize) -> Result<Value, TorchError> {
    i64::try_from(v)
        .map(Value::Int)
        .map_err(|_| TorchError::IndexOverflow(v))
}

fn int_tuple(values: &[usize]) -> Result<Value, TorchError> {
    Ok(Value::Tuple(
        values.iter().map(|&v| int(v)).collect::<Result<_, _>>()?,
    ))
}

/// The value `torch.save` pickles for `tensor` whose storage is saved under `key`.
pub fn tensor_pickle<E: TorchDtype>(tensor: &Tensor<E>, key: &str) -> Result<Value, TorchError> {
    let storage = Value::PersistentId(Box::new(Value::Tuple(std::vec![
        Value::String("storage".into()),
        Value::global("torch", E::STORAGE_TYPE),
        Value::String(key.into()),
        Value::String("cpu".into()),
        int(tensor.storage().len())?,
    ])));
    let backward_hooks = Value::Reduce {
        callable: Box::new(Value::global("collections", "OrderedDict")),
        args: Box::new(Value::Tuple(Vec::new())),
    };
    Ok(Value::Reduce {
        callable: Box::new(Value::global("torch._utils", "_rebuild_tensor_v2")),
        args: Box::new(Value::Tuple(std::vec![
            storage,
            int(tensor.storage_offset())?,
            int_tuple(tensor.shape())?,
            int_tuple(tensor.strides())?,
            Value::Bool(false),
            backward_hooks,
        ])),
    })
}

/// Writes `tensor` as a complete `.pt` archive into `w` and returns `w`.
///
/// Records are stored uncompressed with a fixed timestamp, so the same tensor
/// always produces the same bytes.
pub fn write<E: TorchDtype, W: Write + Seek>(
    tensor: &Tensor<E>,
    archive_name: &str,
    w: W,
) -> Result<W, TorchError> {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default());
    let mut zip = ZipWriter::new(w);

    let pkl = pickle::to_vec(&tensor_pickle(tensor, "0")?);
    zip.start_file_aligned(
        std::format!("{archive_name}/data.pkl"),
        options,
        RECORD_ALIGNMENT,
    )?;
    zip.write_all(&pkl)?;

    zip.start_file_aligned(
        std::format!("{archive_name}/byteorder"),
        options,
        RECORD_ALIGNMENT,
    )?;
    zip.write_all(b"little")?;

    let num_bytes = tensor.storage().len() * E::NUM_BYTES;
    zip.start_file_aligned(
        std::format!("{archive_name}/data/0"),
        options.large_file(num_bytes as u64 >= u32::MAX as u64),
        RECORD_ALIGNMENT,
    )?;
    for block in tensor.storage().chunks(1 << 16) {
        zip.write_all(&E::encode_le(block))?;
    }

    zip.start_file_aligned(
        std::format!("{archive_name}/version"),
        options,
        RECORD_ALIGNMENT,
    )?;
    zip.write_all(FORMAT_VERSION.as_bytes())?;

    Ok(zip.finish()?)
}

/// Saves `tensor` to `path`, naming the archive after the file stem like PyTorch does.
pub fn save<E: TorchDtype, P: AsRef<Path>>(tensor: &Tensor<E>, path: P) -> Result<(), TorchError> {
    let path = path.as_ref();
    let archive_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("archive")
        .to_string();
    let f = BufWriter::new(File::create(path)?);
    let mut f = write(tensor, &archive_name, f)?;
    f.flush()?;
    Ok(())
}

fn read_record<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>, TorchError> {
    let mut f = match zip.by_name(name) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Err(TorchError::MissingRecord(name.to_string())),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::with_capacity(f.size() as usize);
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

fn usize_of(v: &Value, what: &'static str) -> Result<usize, TorchError> {
    v.as_int()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or(TorchError::UnexpectedPickle(what))
}

fn usizes_of(v: &Value, what: &'static str) -> Result<Vec<usize>, TorchError> {
    v.as_tuple()
        .ok_or(TorchError::UnexpectedPickle(what))?
        .iter()
        .map(|d| usize_of(d, what))
        .collect()
}

/// Where a tensor's data lives, as described by `data.pkl`.
struct TensorRecord {
    storage_type: String,
    key: String,
    storage_numel: usize,
    offset: usize,
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl TensorRecord {
    fn is_empty(&self) -> bool {
        self.shape.contains(&0)
    }
}

fn parse_tensor_pickle(value: &Value) -> Result<TensorRecord, TorchError> {
    let args = match value {
        Value::Reduce { callable, args }
            if callable.is_global("torch._utils", "_rebuild_tensor_v2") =>
        {
            args.as_tuple()
                .ok_or(TorchError::UnexpectedPickle("rebuild arguments"))?
        }
        _ => return Err(TorchError::UnexpectedPickle("expected _rebuild_tensor_v2")),
    };
    if args.len() < 4 {
        return Err(TorchError::UnexpectedPickle("rebuild arguments"));
    }
    let pid = match &args[0] {
        Value::PersistentId(pid) => pid
            .as_tuple()
            .ok_or(TorchError::UnexpectedPickle("storage id"))?,
        _ => return Err(TorchError::UnexpectedPickle("storage id")),
    };
    let (storage_type, key, numel) = match pid {
        [tag, Value::Global { module, name }, key, _location, numel]
            if tag.as_str() == Some("storage") && module == "torch" =>
        {
            (name.clone(), key, numel)
        }
        _ => return Err(TorchError::UnexpectedPickle("storage id")),
    };
    Ok(TensorRecord {
        storage_type,
        key: key
            .as_str()
            .ok_or(TorchError::UnexpectedPickle("storage key"))?
            .to_string(),
        storage_numel: usize_of(numel, "storage size")?,
        offset: usize_of(&args[1], "storage offset")?,
        shape: usizes_of(&args[2], "size")?,
        strides: usizes_of(&args[3], "stride")?,
    })
}

/// Reads a tensor from a `.pt` archive.
pub fn read<E: TorchDtype, R: Read + Seek>(r: R) -> Result<Tensor<E>, TorchError> {
    let mut zip = ZipArchive::new(r)?;
    let pkl_name = zip
        .file_names()
        .find(|n| n.ends_with("/data.pkl") && n.matches('/').count() == 1)
        .map(String::from)
        .ok_or_else(|| TorchError::MissingRecord("data.pkl".into()))?;
    let prefix = &pkl_name[..pkl_name.len() - "data.pkl".len()];

    let pkl = read_record(&mut zip, &pkl_name)?;
    let record = parse_tensor_pickle(&pickle::from_slice(&pkl)?)?;
    if record.storage_type != E::STORAGE_TYPE {
        return Err(TorchError::WrongDtype {
            expected: E::STORAGE_TYPE,
            found: record.storage_type,
        });
    }
    if !record.is_empty() && record.strides != contiguous_strides(&record.shape) {
        return Err(TorchError::NonContiguous {
            shape: record.shape,
            strides: record.strides,
        });
    }

    let endian = match read_record(&mut zip, &std::format!("{prefix}byteorder")) {
        Ok(b) if b == b"big" => Endian::Big,
        Ok(_) | Err(TorchError::MissingRecord(_)) => Endian::Little,
        Err(e) => return Err(e),
    };

    let bytes = read_record(&mut zip, &std::format!("{prefix}data/{}", record.key))?;
    let storage = Arc::new(decode_storage::<E>(bytes, record.storage_numel, endian)?);
    Ok(Tensor::from_storage(storage, record.offset, record.shape)?)
}

/// Decodes the first `numel` elements of a storage record.
fn decode_storage<E: Unit>(
    mut bytes: Vec<u8>,
    numel: usize,
    endian: Endian,
) -> Result<Vec<E>, ShapeError> {
    match numel.checked_mul(E::NUM_BYTES) {
        Some(num_bytes) if num_bytes <= bytes.len() => {
            bytes.truncate(num_bytes);
            Ok(E::decode_vec(bytes, endian))
        }
        _ => Err(ShapeError::StorageTooSmall {
            offset: 0,
            numel,
            storage_len: bytes.len() / E::NUM_BYTES,
        }),
    }
}

/// Loads a tensor saved by [save()] or by `torch.save`.
pub fn load<E: TorchDtype, P: AsRef<Path>>(path: P) -> Result<Tensor<E>, TorchError> {
    let f = BufReader::new(File::open(path)?);
    read(f)
}

impl<E: TorchDtype> Tensor<E> {
    /// Saves the tensor to a `.pt` file located at `path`. See [save()].
    pub fn save_pt<P: AsRef<Path>>(&self, path: P) -> Result<(), TorchError> {
        save(self, path)
    }

    /// Loads a tensor from the `.pt` file at `path`. See [load()].
    pub fn load_pt<P: AsRef<Path>>(path: P) -> Result<Self, TorchError> {
        load(path)
    }
}

use super::{
    read_header, read_npy_data, read_npy_object, write_npy, write_npy_object, NpyError, NpyHeader,
    NumpyDtype, ObjectArray,
};
use crate::tensor::Tensor;
use memmap2::{Mmap, MmapOptions};
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Cursor, Read, Seek, Write},
    path::Path,
};
use zip::{result::ZipError, write::FileOptions, CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// A `.npz` archive opened for reading: a zip file of `<name>.npy` members.
///
/// Example Usage:
/// ```no_run
/// use dsprites_core::numpy::NpzArchive;
/// let mut npz = NpzArchive::open("dsprites.npz").unwrap();
/// let imgs = npz.read::<u8>("imgs").unwrap();
/// ```
pub struct NpzArchive<R: Read + Seek> {
    zip: ZipArchive<R>,
}

impl NpzArchive<BufReader<File>> {
    /// Opens the archive at `path` with buffered reads.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, NpzError> {
        let f = BufReader::new(File::open(path)?);
        Self::new(f)
    }
}

impl NpzArchive<Cursor<Mmap>> {
    /// Opens the archive at `path` by memory-mapping it.
    pub fn open_mmap<P: AsRef<Path>>(path: P) -> Result<Self, NpzError> {
        let f = File::open(path)?;
        // SAFETY: the mapping is read only; the archive must not be modified
        // by another process while it is open.
        let buffer = unsafe { MmapOptions::new().map(&f)? };
        Self::new(Cursor::new(buffer))
    }
}

impl<R: Read + Seek> NpzArchive<R> {
    pub fn new(r: R) -> Result<Self, NpzError> {
        Ok(Self {
            zip: ZipArchive::new(r)?,
        })
    }

    /// Names of the arrays in the archive (members without the `.npy` suffix), sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .zip
            .file_names()
            .filter_map(|n| n.strip_suffix(".npy"))
            .map(String::from)
            .collect();
        names.sort();
        names
    }

    fn member(&mut self, name: &str) -> Result<zip::read::ZipFile<'_>, NpzError> {
        let mut filename = name.to_string();
        if !filename.ends_with(".npy") {
            filename.push_str(".npy");
        }
        match self.zip.by_name(&filename) {
            Ok(f) => Ok(f),
            Err(ZipError::FileNotFound) => Err(NpzError::MissingArray(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads only the header of array `name`.
    pub fn header(&mut self, name: &str) -> Result<NpyHeader, NpzError> {
        let mut f = self.member(name)?;
        Ok(read_header(&mut f)?)
    }

    /// Decompresses array `name` into a tensor. Its dtype must be `E`.
    pub fn read<E: NumpyDtype>(&mut self, name: &str) -> Result<Tensor<E>, NpzError> {
        let mut f = self.member(name)?;
        let header = read_header(&mut f)?;
        Ok(read_npy_data(&mut f, &header)?)
    }

    /// Reads object array `name`, unpickling its elements.
    pub fn read_object(&mut self, name: &str) -> Result<ObjectArray, NpzError> {
        let mut f = self.member(name)?;
        let header = read_header(&mut f)?;
        Ok(read_npy_object(&mut f, &header)?)
    }
}

/// Writes `.npz` archives, either stored (`np.savez`) or deflated (`np.savez_compressed`).
pub struct NpzWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    options: FileOptions,
}

impl NpzWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P, compressed: bool) -> Result<Self, NpzError> {
        let f = BufWriter::new(File::create(path)?);
        Ok(Self::new(f, compressed))
    }
}

impl<W: Write + Seek> NpzWriter<W> {
    pub fn new(w: W, compressed: bool) -> Self {
        let method = if compressed {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        let options = FileOptions::default()
            .compression_method(method)
            .last_modified_time(DateTime::default());
        Self {
            zip: ZipWriter::new(w),
            options,
        }
    }

    fn start(&mut self, name: &str, num_bytes: usize) -> Result<(), NpzError> {
        let options = self
            .options
            .large_file(num_bytes as u64 >= u32::MAX as u64);
        self.zip.start_file(std::format!("{name}.npy"), options)?;
        Ok(())
    }

    /// Writes `tensor` to a new member `<name>.npy`.
    pub fn add<E: NumpyDtype>(&mut self, name: &str, tensor: &Tensor<E>) -> Result<(), NpzError> {
        self.start(name, tensor.numel() * E::NUM_BYTES)?;
        write_npy(&mut self.zip, tensor)?;
        Ok(())
    }

    /// Writes an object array to a new member `<name>.npy`.
    pub fn add_object(&mut self, name: &str, array: &ObjectArray) -> Result<(), NpzError> {
        self.start(name, 0)?;
        write_npy_object(&mut self.zip, array)?;
        Ok(())
    }

    /// Writes the central directory and returns the inner writer.
    pub fn finish(mut self) -> Result<W, NpzError> {
        Ok(self.zip.finish()?)
    }
}

/// Error that can happen while loading data from a `.npz` zip archive.
#[derive(Debug)]
pub enum NpzError {
    /// Something went wrong with reading from the `.zip` archive.
    Zip(ZipError),

    /// Something went wrong with loading data from a `.npy` file
    Npy(NpyError),

    /// The archive has no member for the requested array.
    MissingArray(String),
}

impl std::fmt::Display for NpzError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NpzError::Zip(err) => write!(fmt, "{err}"),
            NpzError::Npy(err) => write!(fmt, "{err}"),
            NpzError::MissingArray(name) => write!(fmt, "array '{name}' not found in archive"),
        }
    }
}

impl std::error::Error for NpzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NpzError::Zip(err) => Some(err),
            NpzError::Npy(err) => Some(err),
            NpzError::MissingArray(_) => None,
        }
    }
}

impl From<NpyError> for NpzError {
    fn from(e: NpyError) -> Self {
        Self::Npy(e)
    }
}

impl From<ZipError> for NpzError {
    fn from(e: ZipError) -> Self {
        Self::Zip(e)
    }
}

impl From<io::Error> for NpzError {
    fn from(e: io::Error) -> Self {
        Self::Npy(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pickle::Value;
    use tempfile::NamedTempFile;

    fn write_sample(path: &Path, compressed: bool) {
        let imgs = Tensor::from_vec((0..48u8).collect(), [3, 4, 4]).unwrap();
        let latents = Tensor::from_vec((0..18).map(|i| i as f64 * 0.5).collect(), [3, 6]).unwrap();
        let meta = Value::Dict(std::vec![(
            Value::String("title".into()),
            Value::String("dSprites dataset".into()),
        )]);

        let mut npz = NpzWriter::create(path, compressed).expect("create");
        npz.add("imgs", &imgs).expect("imgs");
        npz.add("latents_values", &latents).expect("latents");
        npz.add_object("metadata", &ObjectArray::scalar_of(meta))
            .expect("metadata");
        npz.finish().expect("finish");
    }

    #[test]
    fn test_npz_round_trip() {
        for compressed in [false, true] {
            let file = NamedTempFile::new().expect("failed to create tempfile");
            write_sample(file.path(), compressed);

            let mut npz = NpzArchive::open(file.path()).expect("open");
            assert_eq!(npz.names(), ["imgs", "latents_values", "metadata"]);

            let imgs = npz.read::<u8>("imgs").expect("imgs");
            assert_eq!(imgs.shape(), &[3, 4, 4]);
            assert_eq!(imgs.row(2).unwrap()[0], 32);

            let latents = npz.read::<f64>("latents_values").expect("latents");
            assert_eq!(latents.as_slice()[17], 8.5);

            let meta = npz.read_object("metadata").expect("metadata");
            assert_eq!(
                meta.scalar().and_then(|m| m.get("title")),
                Some(&Value::String("dSprites dataset".into()))
            );
        }
    }

    #[test]
    fn test_npz_mmap() {
        let file = NamedTempFile::new().expect("failed to create tempfile");
        write_sample(file.path(), true);
        let mut npz = NpzArchive::open_mmap(file.path()).expect("open");
        assert_eq!(npz.header("imgs").unwrap().shape, [3, 4, 4]);
        assert_eq!(npz.read::<u8>("imgs").unwrap().numel(), 48);
    }

    #[test]
    fn test_npz_errors() {
        let file = NamedTempFile::new().expect("failed to create tempfile");
        write_sample(file.path(), false);
        let mut npz = NpzArchive::open(file.path()).expect("open");

        assert!(matches!(
            npz.read::<u8>("latents_classes"),
            Err(NpzError::MissingArray(name)) if name == "latents_classes"
        ));
        assert!(matches!(
            npz.read::<u8>("latents_values"),
            Err(NpzError::Npy(NpyError::WrongDtype { .. }))
        ));
        assert!(npz.read_object("imgs").is_err());
        assert!(NpzArchive::open("/nonexistent/dsprites.npz").is_err());
    }
}

use std::path::PathBuf;

/// Where the dSprites archive is unpacked by default, relative to the working directory.
pub const DEFAULT_ARCHIVE: &str =
    "./dsprites-dataset/dsprites_ndarray_co1sh3sc6or40x32y32_64x64.npz";

/// The archive member holding the `(samples, 64, 64)` binary images.
pub const DEFAULT_FIELD: &str = "imgs";

pub const DEFAULT_CHUNKS: usize = 10;

pub const DEFAULT_PREFIX: &str = "images";

/// Key of the tensor inside each `.safetensors` chunk.
pub const SAFETENSORS_KEY: &str = "images";

/// Container format of the written chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// PyTorch zip container, loadable with `torch.load`.
    #[default]
    Pt,
    #[cfg(feature = "safetensors")]
    Safetensors,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Pt => "pt",
            #[cfg(feature = "safetensors")]
            OutputFormat::Safetensors => "safetensors",
        }
    }
}

/// `<prefix><i>.<extension>`, without zero padding: `images0.pt` ... `images9.pt`.
pub fn chunk_file_name(prefix: &str, i: usize, extension: &str) -> String {
    format!("{prefix}{i}.{extension}")
}

/// Everything one export run needs. [Default] reproduces the fixed behavior
/// of the exporter: ten `images<i>.pt` files in the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    pub archive: PathBuf,
    pub field: String,
    pub chunks: usize,
    pub output_dir: PathBuf,
    pub prefix: String,
    pub format: OutputFormat,
    /// Memory-map the archive instead of reading it through a buffer.
    pub mmap: bool,
    /// Draw a progress bar on stderr while writing.
    pub progress: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            archive: PathBuf::from(DEFAULT_ARCHIVE),
            field: DEFAULT_FIELD.to_string(),
            chunks: DEFAULT_CHUNKS,
            output_dir: PathBuf::from("."),
            prefix: DEFAULT_PREFIX.to_string(),
            format: OutputFormat::default(),
            mmap: false,
            progress: true,
        }
    }
}

impl ExportConfig {
    /// Path chunk `i` is written to.
    pub fn chunk_path(&self, i: usize) -> PathBuf {
        self.output_dir
            .join(chunk_file_name(&self.prefix, i, self.format.extension()))
    }

    pub fn chunk_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        (0..self.chunks).map(|i| self.chunk_path(i))
    }
}

use dsprites::{export, inspect, verify, ExportConfig, ExportError};
use dsprites_core::{
    numpy::{NpzError, NpzWriter, ObjectArray},
    pickle::Value,
    tensor::Tensor,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::BTreeSet,
    fs,
    io::{BufWriter, Write},
    path::Path,
};
use tempfile::TempDir;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

/// Writes a small dSprites-like archive: binary images of `(samples, 4, 4)`,
/// latent values and a metadata dict. Returns the images.
fn write_archive(path: &Path, samples: usize, seed: u64) -> Tensor<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let pixels: Vec<u8> = (0..samples * 16).map(|_| rng.gen_range(0..2)).collect();
    let imgs = Tensor::from_vec(pixels, [samples, 4, 4]).unwrap();
    let latents: Vec<f64> = (0..samples * 6).map(|_| rng.gen()).collect();
    let latents = Tensor::from_vec(latents, [samples, 6]).unwrap();
    let metadata = Value::Dict(vec![
        (
            Value::String("title".into()),
            Value::String("dSprites dataset".into()),
        ),
        (
            Value::String("latents_sizes".into()),
            Value::List([1, 3, 6, 40, 32, 32].into_iter().map(Value::Int).collect()),
        ),
    ]);

    let mut npz = NpzWriter::create(path, true).unwrap();
    npz.add("imgs", &imgs).unwrap();
    npz.add("latents_values", &latents).unwrap();
    npz.add_object("metadata", &ObjectArray::scalar_of(metadata))
        .unwrap();
    npz.finish().unwrap();
    imgs
}

fn config(archive: &Path, output_dir: &Path) -> ExportConfig {
    ExportConfig {
        archive: archive.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        progress: false,
        ..Default::default()
    }
}

fn file_names(dir: &Path) -> BTreeSet<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn test_even_split_covers_every_row() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("dsprites.npz");
    let imgs = write_archive(&archive, 100, 0);
    let out = dir.path().join("out");

    let report = export(&config(&archive, &out)).expect("export failed");
    assert_eq!(report.files.len(), 10);
    assert_eq!(report.plan.slice_size(), 10);
    assert_eq!(report.sample_shape, [4, 4]);

    let expected: BTreeSet<String> = (0..10).map(|i| format!("images{i}.pt")).collect();
    assert_eq!(file_names(&out), expected);

    let mut rows = Vec::new();
    for i in 0..10 {
        let chunk = Tensor::<u8>::load_pt(out.join(format!("images{i}.pt"))).unwrap();
        assert_eq!(chunk.shape(), &[10, 4, 4]);
        rows.extend_from_slice(chunk.as_slice());
    }
    assert_eq!(rows, imgs.as_slice());
}

#[test]
fn test_remainder_is_not_written() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("dsprites.npz");
    let imgs = write_archive(&archive, 105, 1);

    export(&config(&archive, dir.path())).expect("export failed");

    let mut rows = Vec::new();
    for i in 0..10 {
        let chunk = Tensor::<u8>::load_pt(dir.path().join(format!("images{i}.pt"))).unwrap();
        assert_eq!(chunk.shape(), &[10, 4, 4]);
        assert_eq!(chunk.storage().len(), 160);
        rows.extend_from_slice(chunk.as_slice());
    }
    assert_eq!(rows.len(), 100 * 16);
    assert_eq!(rows, &imgs.as_slice()[..100 * 16]);
    assert!(!dir.path().join("images10.pt").exists());
}

#[test]
fn test_rerun_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("dsprites.npz");
    write_archive(&archive, 40, 2);
    let config = config(&archive, dir.path());

    export(&config).unwrap();
    let first: Vec<Vec<u8>> = config.chunk_paths().map(|p| fs::read(p).unwrap()).collect();
    export(&config).unwrap();
    let second: Vec<Vec<u8>> = config.chunk_paths().map(|p| fs::read(p).unwrap()).collect();
    assert_eq!(first, second);
}

#[test]
fn test_existing_files_are_overwritten() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("dsprites.npz");
    write_archive(&archive, 20, 3);
    fs::write(dir.path().join("images0.pt"), vec![0u8; 1 << 16]).unwrap();

    export(&config(&archive, dir.path())).unwrap();
    let chunk = Tensor::<u8>::load_pt(dir.path().join("images0.pt")).unwrap();
    assert_eq!(chunk.shape(), &[2, 4, 4]);
}

#[test]
fn test_mmap_and_verify() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("dsprites.npz");
    write_archive(&archive, 30, 4);
    let config = ExportConfig {
        mmap: true,
        chunks: 3,
        ..config(&archive, dir.path())
    };

    export(&config).unwrap();
    assert_eq!(verify(&config).unwrap(), 3);
}

#[cfg(feature = "safetensors")]
#[test]
fn test_safetensors_format() {
    use dsprites::OutputFormat;

    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("dsprites.npz");
    let imgs = write_archive(&archive, 20, 5);
    let config = ExportConfig {
        format: OutputFormat::Safetensors,
        chunks: 2,
        ..config(&archive, dir.path())
    };

    let report = export(&config).unwrap();
    assert_eq!(report.files[1], dir.path().join("images1.safetensors"));
    let chunk = Tensor::<u8>::load_safetensors(&report.files[1], "images").unwrap();
    assert_eq!(chunk.as_slice(), &imgs.as_slice()[160..]);
    assert_eq!(verify(&config).unwrap(), 2);
}

#[test]
fn test_errors() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("dsprites.npz");
    write_archive(&archive, 10, 6);

    let missing_field = ExportConfig {
        field: "images".into(),
        ..config(&archive, dir.path())
    };
    assert!(matches!(
        export(&missing_field),
        Err(ExportError::Npz(NpzError::MissingArray(_)))
    ));

    let wrong_dtype = ExportConfig {
        field: "latents_values".into(),
        ..config(&archive, dir.path())
    };
    assert!(matches!(
        export(&wrong_dtype),
        Err(ExportError::Npz(NpzError::Npy(_)))
    ));

    let missing_archive = config(&dir.path().join("nope.npz"), dir.path());
    assert!(matches!(
        export(&missing_archive),
        Err(ExportError::Npz(_))
    ));

    assert!(file_names(dir.path()).iter().all(|n| !n.ends_with(".pt")));
}

#[test]
fn test_inspect_archive() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("dsprites.npz");
    write_archive(&archive, 10, 7);

    let summary = inspect(&archive, false).unwrap();
    let names: Vec<&str> = summary.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["imgs", "latents_values", "metadata"]);
    assert_eq!(summary.field("imgs").unwrap().shape, [10, 4, 4]);
    assert_eq!(summary.field("latents_values").unwrap().descr, "<f8");
    let keys: Vec<&str> = summary.metadata_keys().collect();
    assert_eq!(keys, ["title", "latents_sizes"]);
    assert_eq!(summary.metadata[1].2, "[1, 3, 6, 40, 32, 32]");
}

/// `pickle.dumps(arr, protocol=3)` of the 0-d object array `np.savez` stores for
/// `metadata=dict(date=..., latents_sizes=np.array([1, 3, 6, 40, 32, 32]), title=...)`.
const NUMPY_METADATA: &[u8] = b"\
\x80\x03cnumpy.core.multiarray\n_reconstruct\nq\x00cnumpy\nndarray\nq\x01\
K\x00\x85q\x02C\x01bq\x03\x87q\x04Rq\x05(K\x01)cnumpy\ndtype\nq\x06\
X\x02\x00\x00\x00O8q\x07\x89\x88\x87q\x08Rq\x09(K\x03X\x01\x00\x00\x00|q\nNN\
NJ\xff\xff\xff\xffJ\xff\xff\xff\xffK?tq\x0bb\x89]q\x0c}q\x0d(\
X\x04\x00\x00\x00dateq\x0eX\n\x00\x00\x00April\x202017q\x0f\
X\x0d\x00\x00\x00latents_sizesq\x10h\x00h\x01h\x02h\x03\x87q\x11Rq\x12(K\x01\
K\x06\x85q\x13h\x06X\x02\x00\x00\x00i8q\x14\x89\x88\x87q\x15Rq\x16(K\x03\
X\x01\x00\x00\x00<q\x17NNNJ\xff\xff\xff\xffJ\xff\xff\xff\xffK\x00tq\x18b\x89\
C0\x01\x00\x00\x00\x00\x00\x00\x00\x03\x00\x00\x00\x00\x00\x00\x00\
\x06\x00\x00\x00\x00\x00\x00\x00(\x00\x00\x00\x00\x00\x00\x00\
\x20\x00\x00\x00\x00\x00\x00\x00\x20\x00\x00\x00\x00\x00\x00\x00\
q\x19tq\x1abX\x05\x00\x00\x00titleq\x1bX\x10\x00\x00\x00dSprites\x20dataset\
q\x1cuatq\x1db.";

/// A version 1.0 `.npy` member the way numpy lays it out: header dict padded
/// with spaces to a multiple of 64 bytes, then the raw data.
fn npy_member(dict: &str, data: &[u8]) -> Vec<u8> {
    let padded = (10 + dict.len() + 1 + 63) / 64 * 64 - 10;
    let mut out = b"\x93NUMPY\x01\x00".to_vec();
    out.extend_from_slice(&(padded as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.resize(10 + padded - 1, b' ');
    out.push(b'\n');
    out.extend_from_slice(data);
    out
}

/// Writes an archive laid out like `np.savez` output: stored members
/// `imgs`, `latents_classes` (`<i8`) and a pickled `metadata` dict.
fn write_numpy_archive(path: &Path) -> Vec<u8> {
    let pixels: Vec<u8> = (0..4 * 2 * 2).map(|i| (i % 3 == 0) as u8).collect();
    let classes: Vec<u8> = (0..4 * 6i64).flat_map(|v| v.to_le_bytes()).collect();
    let members = [
        (
            "imgs.npy",
            npy_member(
                "{'descr': '|u1', 'fortran_order': False, 'shape': (4, 2, 2), }",
                &pixels,
            ),
        ),
        (
            "latents_classes.npy",
            npy_member(
                "{'descr': '<i8', 'fortran_order': False, 'shape': (4, 6), }",
                &classes,
            ),
        ),
        (
            "metadata.npy",
            npy_member(
                "{'descr': '|O', 'fortran_order': False, 'shape': (), }",
                NUMPY_METADATA,
            ),
        ),
    ];

    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    let mut zip = ZipWriter::new(BufWriter::new(fs::File::create(path).unwrap()));
    for (name, bytes) in &members {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap().flush().unwrap();
    pixels
}

#[test]
fn test_numpy_written_archive() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("dsprites.npz");
    let pixels = write_numpy_archive(&archive);

    let summary = inspect(&archive, false).unwrap();
    let classes = summary.field("latents_classes").unwrap();
    assert_eq!(classes.descr, "<i8");
    assert_eq!(classes.shape, [4, 6]);
    assert_eq!(summary.field("metadata").unwrap().descr, "|O");
    let keys: Vec<&str> = summary.metadata_keys().collect();
    assert_eq!(keys, ["date", "latents_sizes", "title"]);
    assert_eq!(summary.metadata[0].2, "\"April 2017\"");
    assert_eq!(summary.metadata[1].2, "ndarray(6,)");
    assert_eq!(summary.metadata[2].2, "\"dSprites dataset\"");

    let config = ExportConfig {
        chunks: 2,
        ..config(&archive, dir.path())
    };
    let report = export(&config).expect("export failed");
    assert_eq!(report.sample_shape, [2, 2]);
    let chunk = Tensor::<u8>::load_pt(&report.files[1]).unwrap();
    assert_eq!(chunk.as_slice(), &pixels[8..]);
    assert_eq!(verify(&config).unwrap(), 2);
}

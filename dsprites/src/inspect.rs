//! A printable summary of what a `.npz` archive holds.

use dsprites_core::{
    numpy::{NpzArchive, NpzError},
    pickle::Value,
};
use std::{
    fmt,
    io::{Read, Seek},
    path::Path,
};

const MAX_VALUE_WIDTH: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSummary {
    pub name: String,
    /// Numpy type string, e.g. `|u1` or `<f8`.
    pub descr: String,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub fields: Vec<FieldSummary>,
    /// Top level entries of pickled dict fields, as `(field, key, rendered value)`.
    pub metadata: Vec<(String, String, String)>,
}

impl ArchiveSummary {
    pub fn field(&self, name: &str) -> Option<&FieldSummary> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn metadata_keys(&self) -> impl Iterator<Item = &str> {
        self.metadata.iter().map(|(_, k, _)| k.as_str())
    }
}

/// Reads every header of the archive at `path`, and decodes its object fields.
pub fn inspect<P: AsRef<Path>>(path: P, mmap: bool) -> Result<ArchiveSummary, NpzError> {
    if mmap {
        summarize(&mut NpzArchive::open_mmap(path)?)
    } else {
        summarize(&mut NpzArchive::open(path)?)
    }
}

pub fn summarize<R: Read + Seek>(npz: &mut NpzArchive<R>) -> Result<ArchiveSummary, NpzError> {
    let mut fields = Vec::new();
    let mut metadata = Vec::new();
    for name in npz.names() {
        let header = npz.header(&name)?;
        if header.is_object() {
            let array = npz.read_object(&name)?;
            if let Some(items) = array.scalar().and_then(Value::as_dict) {
                for (k, v) in items {
                    let key = k.as_str().map_or_else(|| k.to_string(), String::from);
                    metadata.push((name.clone(), key, render(v)));
                }
            }
        }
        fields.push(FieldSummary {
            name,
            descr: header.descr(),
            shape: header.shape,
        });
    }
    Ok(ArchiveSummary { fields, metadata })
}

/// Pickled numpy arrays print as `ndarray(shape)`, everything else as Python would
/// print it, cut at [MAX_VALUE_WIDTH] characters.
fn render(value: &Value) -> String {
    if let Some(shape) = ndarray_shape(value) {
        return format!("ndarray{shape}");
    }
    let text = match value {
        Value::Dict(items) if items.iter().any(|(_, v)| ndarray_shape(v).is_some()) => {
            let inner: Vec<String> = items
                .iter()
                .map(|(k, v)| format!("{k}: {}", render(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        _ => value.to_string(),
    };
    if text.chars().count() > MAX_VALUE_WIDTH {
        let cut: String = text.chars().take(MAX_VALUE_WIDTH - 3).collect();
        format!("{cut}...")
    } else {
        text
    }
}

fn ndarray_shape(value: &Value) -> Option<&Value> {
    match value {
        Value::Build { obj, state } => match (&**obj, state.as_tuple()?) {
            (Value::Reduce { callable, .. }, [_, shape, ..]) if is_reconstruct(callable) => {
                Some(shape)
            }
            _ => None,
        },
        _ => None,
    }
}

fn is_reconstruct(callable: &Value) -> bool {
    matches!(callable, Value::Global { name, .. } if name == "_reconstruct")
}

impl fmt::Display for ArchiveSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let width = self.fields.iter().map(|x| x.name.len()).max().unwrap_or(0);
        for field in &self.fields {
            writeln!(
                f,
                "{:width$}  {:4}  {:?}",
                field.name, field.descr, field.shape
            )?;
        }
        let mut current = None;
        for (field, key, value) in &self.metadata {
            if current != Some(field) {
                writeln!(f, "{field}:")?;
                current = Some(field);
            }
            writeln!(f, "  {key}: {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsprites_core::{
        numpy::{NpzWriter, ObjectArray},
        tensor::Tensor,
    };
    use std::io::Cursor;

    fn metadata() -> Value {
        let s = |v: &str| Value::String(v.into());
        let sizes = ObjectArray {
            shape: std::vec![6],
            items: Vec::new(),
        };
        Value::Dict(std::vec![
            (s("title"), s("dSprites dataset")),
            (s("date"), s("April 2017")),
            (
                s("latents_names"),
                Value::Tuple(
                    ["color", "shape", "scale", "orientation", "posX", "posY"]
                        .iter()
                        .map(|n| s(*n))
                        .collect(),
                ),
            ),
            (s("latents_sizes"), sizes.to_pickle()),
        ])
    }

    #[test]
    fn test_summarize() {
        let mut npz = NpzWriter::new(Cursor::new(Vec::new()), true);
        npz.add("imgs", &Tensor::<u8>::zeros([4, 8, 8])).unwrap();
        npz.add("latents_classes", &Tensor::<i64>::zeros([4, 6]))
            .unwrap();
        npz.add_object("metadata", &ObjectArray::scalar_of(metadata()))
            .unwrap();
        let mut buf = npz.finish().unwrap();
        buf.set_position(0);

        let summary = summarize(&mut NpzArchive::new(buf).unwrap()).unwrap();
        let imgs = summary.field("imgs").unwrap();
        assert_eq!(imgs.descr, "|u1");
        assert_eq!(imgs.shape, [4, 8, 8]);
        assert_eq!(summary.field("latents_classes").unwrap().descr, "<i8");
        assert_eq!(summary.field("metadata").unwrap().descr, "|O");

        let keys: Vec<&str> = summary.metadata_keys().collect();
        assert_eq!(keys, ["title", "date", "latents_names", "latents_sizes"]);
        assert_eq!(summary.metadata[0].2, "\"dSprites dataset\"");
        assert_eq!(summary.metadata[3].2, "ndarray(6,)");

        let text = summary.to_string();
        assert!(text.contains("imgs"));
        assert!(text.contains("metadata:\n  title: \"dSprites dataset\""));
    }

    #[test]
    fn test_render_truncates() {
        let long = Value::List((0..100).map(Value::Int).collect());
        let text = render(&long);
        assert_eq!(text.chars().count(), MAX_VALUE_WIDTH);
        assert!(text.ends_with("..."));
    }
}

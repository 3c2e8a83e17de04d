use super::{write_header, NpyError, NpyHeader};
use crate::{
    dtypes::Endian,
    pickle::{self, Pickler, Value},
};
use std::io::{Read, Write};

/// A numpy array of python objects (`dtype=object`), stored in `.npy` files as a pickle.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectArray {
    pub shape: Vec<usize>,
    /// The elements in C order.
    pub items: Vec<Value>,
}

impl ObjectArray {
    /// The single element of a 0-d array, e.g. a pickled metadata dict.
    pub fn scalar(&self) -> Option<&Value> {
        match self.items.as_slice() {
            [v] if self.shape.is_empty() => Some(v),
            _ => None,
        }
    }

    /// A 0-d array holding `item`.
    pub fn scalar_of(item: Value) -> Self {
        Self {
            shape: Vec::new(),
            items: std::vec![item],
        }
    }

    /// The value `pickle.dumps(array)` describes, the inverse of [ObjectArray::from_pickle()].
    pub fn to_pickle(&self) -> Value {
        let obj = Value::Reduce {
            callable: Box::new(Value::global("numpy.core.multiarray", "_reconstruct")),
            args: Box::new(Value::Tuple(std::vec![
                Value::global("numpy", "ndarray"),
                Value::Tuple(std::vec![Value::Int(0)]),
                Value::String("b".into()),
            ])),
        };
        let dtype = Value::Build {
            obj: Box::new(Value::Reduce {
                callable: Box::new(Value::global("numpy", "dtype")),
                args: Box::new(Value::Tuple(std::vec![
                    Value::String("O8".into()),
                    Value::Bool(false),
                    Value::Bool(true),
                ])),
            }),
            state: Box::new(Value::Tuple(std::vec![
                Value::Int(3),
                Value::String("|".into()),
                Value::None,
                Value::None,
                Value::None,
                Value::Int(-1),
                Value::Int(-1),
                Value::Int(63),
            ])),
        };
        let shape = self.shape.iter().map(|&d| Value::Int(d as i64)).collect();
        Value::Build {
            obj: Box::new(obj),
            state: Box::new(Value::Tuple(std::vec![
                Value::Int(1),
                Value::Tuple(shape),
                dtype,
                Value::Bool(false),
                Value::List(self.items.clone()),
            ])),
        }
    }

    /// Interprets the unpickled form of `numpy.ndarray`:
    /// `_reconstruct(ndarray, (0,), b'b')` built with
    /// `(version, shape, dtype, is_fortran, items)`.
    pub fn from_pickle(value: &Value) -> Result<Self, NpyError> {
        let (obj, state) = match value {
            Value::Build { obj, state } => (obj, state),
            _ => return Err(NpyError::NotAnObjectArray),
        };
        match &**obj {
            Value::Reduce { callable, .. }
                if callable.is_global("numpy.core.multiarray", "_reconstruct")
                    || callable.is_global("numpy._core.multiarray", "_reconstruct") => {}
            _ => return Err(NpyError::NotAnObjectArray),
        }
        let state = state.as_tuple().ok_or(NpyError::NotAnObjectArray)?;
        let (shape, items) = match state {
            [_, shape, _, _, items] => (shape, items),
            _ => return Err(NpyError::NotAnObjectArray),
        };
        let shape = shape
            .as_tuple()
            .ok_or(NpyError::NotAnObjectArray)?
            .iter()
            .map(|d| d.as_int().and_then(|d| usize::try_from(d).ok()))
            .collect::<Option<Vec<usize>>>()
            .ok_or(NpyError::HeaderInvalidShape)?;
        let items = items.as_list().ok_or(NpyError::NotAnObjectArray)?.to_vec();
        Ok(Self { shape, items })
    }
}

/// Writes `array` as an object `.npy` stream: header followed by its pickle.
pub fn write_npy_object<W: Write>(w: &mut W, array: &ObjectArray) -> std::io::Result<()> {
    write_header(
        w,
        &NpyHeader {
            dtype: "O".into(),
            endian: Endian::Native,
            fortran_order: false,
            shape: array.shape.clone(),
        },
    )?;
    Pickler::new(w).dump(&array.to_pickle())
}

/// Reads the pickled payload of an object array that follows `header`.
pub fn read_npy_object<R: Read>(r: &mut R, header: &NpyHeader) -> Result<ObjectArray, NpyError> {
    if !header.is_object() {
        return Err(NpyError::WrongDtype {
            expected: "O",
            found: header.descr(),
        });
    }
    let value = pickle::from_reader(r)?;
    ObjectArray::from_pickle(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pickle_scalar() {
        let meta = Value::Dict(std::vec![(
            Value::String("title".into()),
            Value::String("dSprites dataset".into()),
        )]);
        let pickled = ObjectArray::scalar_of(meta.clone()).to_pickle();
        let arr = ObjectArray::from_pickle(&pickled).unwrap();
        assert!(arr.shape.is_empty());
        assert_eq!(arr.scalar(), Some(&meta));
    }

    #[test]
    fn test_from_pickle_rejects_other_values() {
        assert!(matches!(
            ObjectArray::from_pickle(&Value::Int(1)),
            Err(NpyError::NotAnObjectArray)
        ));
        let not_numpy = Value::Build {
            obj: Box::new(Value::global("collections", "OrderedDict")),
            state: Box::new(Value::None),
        };
        assert!(ObjectArray::from_pickle(&not_numpy).is_err());
    }

    #[test]
    fn test_read_npy_object() {
        let mut buf = Vec::new();
        write_npy_object(&mut buf, &ObjectArray::scalar_of(Value::Int(7))).unwrap();

        let mut r = buf.as_slice();
        let h = super::super::read_header(&mut r).unwrap();
        assert_eq!(h.descr(), "|O");
        let arr = read_npy_object(&mut r, &h).unwrap();
        assert_eq!(arr.scalar(), Some(&Value::Int(7)));
    }
}

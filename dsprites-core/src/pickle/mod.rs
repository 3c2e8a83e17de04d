//! A small model of Python's pickle format.
//!
//! Only what is needed to talk to PyTorch (`data.pkl` inside a `.pt` archive)
//! and to NumPy object arrays is supported. Nothing is ever executed: globals
//! and calls are kept as data ([Value::Global], [Value::Reduce]) and the caller
//! decides what they mean.
//!
//! Reading goes through `repugnant_pickle`. Writing is done by [Pickler], which
//! emits protocol 2 the way CPython does.

mod read;
mod write;

pub use read::*;
pub use write::*;

/// Pickle opcodes.
pub(crate) mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const BINFLOAT: u8 = b'G';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const BINPERSID: u8 = b'Q';
    pub const REDUCE: u8 = b'R';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const EMPTY_LIST: u8 = b']';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';

    pub const PROTO: u8 = 0x80;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const EMPTY_SET: u8 = 0x8f;
    pub const ADDITEMS: u8 = 0x90;
}

/// A value on the pickle stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    /// Key/value pairs in insertion order.
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
    /// A reference to `module.name`.
    Global { module: String, name: String },
    /// An object the pickler replaced with an identifier (`BINPERSID`).
    PersistentId(Box<Value>),
    /// `callable(*args)`.
    Reduce {
        callable: Box<Value>,
        args: Box<Value>,
    },
    /// `obj.__setstate__(state)`.
    Build { obj: Box<Value>, state: Box<Value> },
}

impl Value {
    pub fn global(module: &str, name: &str) -> Self {
        Value::Global {
            module: module.into(),
            name: name.into(),
        }
    }

    pub fn is_global(&self, module: &str, name: &str) -> bool {
        matches!(self, Value::Global { module: m, name: n } if m == module && n == name)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Dict(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a string key in a [Value::Dict].
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        fn seq(f: &mut std::fmt::Formatter, items: &[Value]) -> std::fmt::Result {
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{v}")?;
            }
            Ok(())
        }
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Tuple(items) => {
                write!(f, "(")?;
                seq(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::List(items) => {
                write!(f, "[")?;
                seq(f, items)?;
                write!(f, "]")
            }
            Value::Set(items) => {
                write!(f, "{{")?;
                seq(f, items)?;
                write!(f, "}}")
            }
            Value::Dict(items) => {
                write!(f, "{{")?;
                for (i, (k, v)) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Global { module, name } => write!(f, "{module}.{name}"),
            Value::PersistentId(pid) => write!(f, "persistent_id({pid})"),
            Value::Reduce { callable, args } => write!(f, "{callable}{args}"),
            Value::Build { obj, .. } => write!(f, "{obj}"),
        }
    }
}

#[derive(Debug)]
pub enum PickleError {
    /// Error from reading the underlying stream.
    IoError(std::io::Error),

    /// The byte stream is not a sequence of pickle opcodes.
    Parse(String),

    /// The opcodes could not be evaluated.
    Eval(String),

    /// The pickle left nothing on the stack.
    Empty,

    /// The stack held more than one value at `STOP`.
    TrailingStack(usize),

    /// A value with no [Value] counterpart.
    Unsupported(String),
}

impl std::fmt::Display for PickleError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PickleError::IoError(err) => write!(fmt, "{err}"),
            PickleError::Parse(err) => write!(fmt, "malformed pickle: {err}"),
            PickleError::Eval(err) => write!(fmt, "could not evaluate pickle: {err}"),
            PickleError::Empty => write!(fmt, "pickle holds no value"),
            PickleError::TrailingStack(n) => write!(fmt, "{n} values left on stack at STOP"),
            PickleError::Unsupported(what) => write!(fmt, "unsupported pickle value {what}"),
        }
    }
}

impl std::error::Error for PickleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PickleError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PickleError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dict_get() {
        let d = Value::Dict(std::vec![
            (Value::String("a".into()), Value::Int(1)),
            (Value::Int(2), Value::Int(3)),
        ]);
        assert_eq!(d.get("a"), Some(&Value::Int(1)));
        assert_eq!(d.get("b"), None);
        assert_eq!(Value::None.get("a"), None);
    }

    #[test]
    fn test_display() {
        let v = Value::Tuple(std::vec![
            Value::String("color".into()),
            Value::List(std::vec![Value::Int(1), Value::Float(0.5)]),
            Value::Tuple(std::vec![Value::Bool(false)]),
        ]);
        assert_eq!(v.to_string(), "(\"color\", [1, 0.5], (False,))");
    }

    #[test]
    fn test_round_trip_through_reader() {
        let v = Value::Dict(std::vec![
            (
                Value::String("latents_sizes".into()),
                Value::List(std::vec![Value::Int(1), Value::Int(3), Value::Int(40)]),
            ),
            (Value::String("version".into()), Value::Int(1)),
            (Value::String("scale".into()), Value::Float(-0.25)),
            (Value::String("big".into()), Value::Int(-(1 << 20))),
            (Value::String("none".into()), Value::None),
        ]);
        let bytes = to_vec(&v);
        assert_eq!(from_slice(&bytes).unwrap(), v);
    }
}

use super::{op, Value};
use std::io::{self, Write};

/// Serializes [Value]s as pickle protocol 2, memoizing the same values CPython does
/// (strings, non-empty tuples, lists, dicts, globals and reduce results).
pub struct Pickler<W: Write> {
    w: W,
    memo: u32,
}

impl<W: Write> Pickler<W> {
    pub fn new(w: W) -> Self {
        Self { w, memo: 0 }
    }

    /// Writes `PROTO 2`, the value and `STOP`.
    pub fn dump(&mut self, value: &Value) -> io::Result<()> {
        self.w.write_all(&[op::PROTO, 2])?;
        self.save(value)?;
        self.w.write_all(&[op::STOP])
    }

    pub fn into_inner(self) -> W {
        self.w
    }

    fn put(&mut self) -> io::Result<()> {
        if self.memo < 256 {
            self.w.write_all(&[op::BINPUT, self.memo as u8])?;
        } else {
            self.w.write_all(&[op::LONG_BINPUT])?;
            self.w.write_all(&self.memo.to_le_bytes())?;
        }
        self.memo += 1;
        Ok(())
    }

    fn save_int(&mut self, v: i64) -> io::Result<()> {
        if (0..=0xff).contains(&v) {
            self.w.write_all(&[op::BININT1, v as u8])
        } else if (0..=0xffff).contains(&v) {
            self.w.write_all(&[op::BININT2])?;
            self.w.write_all(&(v as u16).to_le_bytes())
        } else if i32::try_from(v).is_ok() {
            self.w.write_all(&[op::BININT])?;
            self.w.write_all(&(v as i32).to_le_bytes())
        } else {
            let bytes = encode_long(v);
            self.w.write_all(&[op::LONG1, bytes.len() as u8])?;
            self.w.write_all(&bytes)
        }
    }

    fn save_seq(&mut self, items: &[Value], single: u8, many: u8) -> io::Result<()> {
        match items {
            [] => Ok(()),
            [v] => {
                self.save(v)?;
                self.w.write_all(&[single])
            }
            _ => {
                self.w.write_all(&[op::MARK])?;
                for v in items {
                    self.save(v)?;
                }
                self.w.write_all(&[many])
            }
        }
    }

    fn save(&mut self, value: &Value) -> io::Result<()> {
        match value {
            Value::None => self.w.write_all(&[op::NONE]),
            Value::Bool(true) => self.w.write_all(&[op::NEWTRUE]),
            Value::Bool(false) => self.w.write_all(&[op::NEWFALSE]),
            Value::Int(v) => self.save_int(*v),
            Value::Float(v) => {
                self.w.write_all(&[op::BINFLOAT])?;
                self.w.write_all(&v.to_be_bytes())
            }
            Value::String(s) => {
                self.w.write_all(&[op::BINUNICODE])?;
                self.w.write_all(&(s.len() as u32).to_le_bytes())?;
                self.w.write_all(s.as_bytes())?;
                self.put()
            }
            Value::Bytes(b) => {
                if b.len() < 256 {
                    self.w.write_all(&[op::SHORT_BINBYTES, b.len() as u8])?;
                } else {
                    self.w.write_all(&[op::BINBYTES])?;
                    self.w.write_all(&(b.len() as u32).to_le_bytes())?;
                }
                self.w.write_all(b)?;
                self.put()
            }
            Value::Tuple(items) => {
                match items.len() {
                    0 => return self.w.write_all(&[op::EMPTY_TUPLE]),
                    1..=3 => {
                        for v in items {
                            self.save(v)?;
                        }
                        self.w
                            .write_all(&[[op::TUPLE1, op::TUPLE2, op::TUPLE3][items.len() - 1]])?;
                    }
                    _ => {
                        self.w.write_all(&[op::MARK])?;
                        for v in items {
                            self.save(v)?;
                        }
                        self.w.write_all(&[op::TUPLE])?;
                    }
                }
                self.put()
            }
            Value::List(items) => {
                self.w.write_all(&[op::EMPTY_LIST])?;
                self.put()?;
                self.save_seq(items, op::APPEND, op::APPENDS)
            }
            Value::Set(items) => {
                self.w.write_all(&[op::EMPTY_SET])?;
                self.put()?;
                if !items.is_empty() {
                    self.w.write_all(&[op::MARK])?;
                    for v in items {
                        self.save(v)?;
                    }
                    self.w.write_all(&[op::ADDITEMS])?;
                }
                Ok(())
            }
            Value::Dict(items) => {
                self.w.write_all(&[op::EMPTY_DICT])?;
                self.put()?;
                match items.as_slice() {
                    [] => Ok(()),
                    [(k, v)] => {
                        self.save(k)?;
                        self.save(v)?;
                        self.w.write_all(&[op::SETITEM])
                    }
                    _ => {
                        self.w.write_all(&[op::MARK])?;
                        for (k, v) in items {
                            self.save(k)?;
                            self.save(v)?;
                        }
                        self.w.write_all(&[op::SETITEMS])
                    }
                }
            }
            Value::Global { module, name } => {
                self.w.write_all(&[op::GLOBAL])?;
                write!(self.w, "{module}\n{name}\n")?;
                self.put()
            }
            Value::PersistentId(pid) => {
                self.save(pid)?;
                self.w.write_all(&[op::BINPERSID])
            }
            Value::Reduce { callable, args } => {
                self.save(callable)?;
                self.save(args)?;
                self.w.write_all(&[op::REDUCE])?;
                self.put()
            }
            Value::Build { obj, state } => {
                self.save(obj)?;
                self.save(state)?;
                self.w.write_all(&[op::BUILD])
            }
        }
    }
}

/// Little endian two's complement with as few bytes as possible, like `pickle.encode_long`.
fn encode_long(v: i64) -> Vec<u8> {
    if v == 0 {
        return Vec::new();
    }
    let mut bytes = v.to_le_bytes().to_vec();
    while bytes.len() > 1 {
        let last = bytes[bytes.len() - 1];
        let prev_sign = bytes[bytes.len() - 2] & 0x80;
        if (last == 0x00 && prev_sign == 0) || (last == 0xff && prev_sign != 0) {
            bytes.pop();
        } else {
            break;
        }
    }
    bytes
}

/// Pickles `value` into a new buffer.
pub fn to_vec(value: &Value) -> Vec<u8> {
    let mut p = Pickler::new(Vec::new());
    // writes into a Vec never fail
    let _ = p.dump(value);
    p.into_inner()
}

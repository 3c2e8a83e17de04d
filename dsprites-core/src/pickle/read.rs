use super::{PickleError, Value};
use nom::error::VerboseError;
use repugnant_pickle as rp;
use std::io::Read;

/// Unpickles a single value from `buf`.
///
/// `repugnant_pickle` tokenizes and evaluates the stream without running
/// anything; its values are then turned into a [Value] tree.
pub fn from_slice(buf: &[u8]) -> Result<Value, PickleError> {
    let (_, ops) = rp::parse_ops::<VerboseError<&[u8]>>(buf)
        .map_err(|e| PickleError::Parse(format!("{e:?}")))?;
    let (mut values, _memo) =
        rp::evaluate(&ops, true).map_err(|e| PickleError::Eval(e.to_string()))?;
    let value = values.pop().ok_or(PickleError::Empty)?;
    if !values.is_empty() {
        return Err(PickleError::TrailingStack(values.len()));
    }
    convert(&value)
}

/// Reads `r` to the end and unpickles the value in it.
pub fn from_reader<R: Read>(r: &mut R) -> Result<Value, PickleError> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    from_slice(&buf)
}

fn convert(value: &rp::Value) -> Result<Value, PickleError> {
    Ok(match value {
        rp::Value::Raw(op) => from_op(op)?,
        rp::Value::Int(v) => Value::Int(*v),
        rp::Value::Bool(b) => Value::Bool(*b),
        rp::Value::String(s) => Value::String(s.to_string()),
        rp::Value::Seq(kind, items) => {
            let items = convert_all(items)?;
            match kind {
                rp::SequenceType::Tuple => Value::Tuple(items),
                rp::SequenceType::List => Value::List(items),
                rp::SequenceType::Dict => Value::Dict(pairs(items)?),
                _ => Value::Set(items),
            }
        }
        rp::Value::Global(callable, args) => Value::Reduce {
            callable: Box::new(convert(callable)?),
            args: Box::new(reduce_args(args)?),
        },
        rp::Value::Build(obj, state) => Value::Build {
            obj: Box::new(convert(obj)?),
            state: Box::new(convert(state)?),
        },
        rp::Value::PersId(pid) => Value::PersistentId(Box::new(convert(pid)?)),
        other => return Err(PickleError::Unsupported(format!("{other:?}"))),
    })
}

fn from_op(op: &rp::ops::PickleOp) -> Result<Value, PickleError> {
    Ok(match op {
        rp::ops::PickleOp::NONE => Value::None,
        rp::ops::PickleOp::BINFLOAT(v) => Value::Float(*v),
        rp::ops::PickleOp::SHORT_BINBYTES(b) | rp::ops::PickleOp::BINBYTES(b) => Value::Bytes(b.to_vec()),
        rp::ops::PickleOp::GLOBAL(module, name) => Value::global(module, name),
        other => return Err(PickleError::Unsupported(format!("{other:?}"))),
    })
}

fn convert_all(items: &[rp::Value]) -> Result<Vec<Value>, PickleError> {
    items.iter().map(convert).collect()
}

/// The arguments of a call arrive as one tuple, or as loose values.
fn reduce_args(args: &[rp::Value]) -> Result<Value, PickleError> {
    match args {
        [single @ rp::Value::Seq(rp::SequenceType::Tuple, _)] => convert(single),
        _ => Ok(Value::Tuple(convert_all(args)?)),
    }
}

/// Dict entries come as `(key, value)` tuples, or flat as `key, value, ...`.
fn pairs(items: Vec<Value>) -> Result<Vec<(Value, Value)>, PickleError> {
    if items
        .iter()
        .all(|v| matches!(v.as_tuple(), Some(kv) if kv.len() == 2))
    {
        return Ok(items
            .into_iter()
            .filter_map(|v| match v {
                Value::Tuple(mut kv) => {
                    let value = kv.pop()?;
                    let key = kv.pop()?;
                    Some((key, value))
                }
                _ => None,
            })
            .collect());
    }
    if items.len() % 2 != 0 {
        return Err(PickleError::Unsupported(
            "dict with a key and no value".into(),
        ));
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(k), Some(v)) = (items.next(), items.next()) {
        out.push((k, v));
    }
    Ok(out)
}

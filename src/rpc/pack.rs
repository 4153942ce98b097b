//! Positional parameter codec.
//!
//! Parameters are written in schema order with no tags and no padding:
//!
//! | kind      | encoding                                   |
//! |-----------|--------------------------------------------|
//! | scalar    | fixed width, little-endian; bool is 0 / 1  |
//! | string    | LE u32 byte length, UTF-8 bytes            |
//! | array     | LE u32 element count, packed elements      |
//! | reference | LE u32                                     |
//! | callback  | LE u32 caller context                      |
//!
//! Packing trusts the caller (values come from local code and are checked
//! with [`Value::matches`]; a mismatch is a defect and is fatal).
//! Unpacking trusts nothing: every length is checked against both the
//! remaining buffer and the schema bound before anything is read.

use crate::error::DecodeError;
use crate::schema::{CallbackSpec, OperationSpec, ParamKind, ParamSpec, ScalarKind};

use super::message::Buffer;
use super::value::Value;

// ── Packer ───────────────────────────────────────────────────

/// Appends values to a bounded [`Buffer`].
pub struct Packer {
    buf: Buffer,
}

impl Packer {
    pub fn new() -> Self {
        Self { buf: Buffer::new() }
    }

    fn put(&mut self, bytes: &[u8]) {
        if self.buf.extend_from_slice(bytes).is_err() {
            crate::fatal!(
                "packed message exceeds {} bytes",
                super::message::MAX_MESSAGE_SIZE
            );
        }
    }

    pub fn put_u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    /// Write `value` as `kind`.
    pub fn put_value(&mut self, name: &str, kind: &ParamKind, value: &Value) {
        if !value.matches(kind) {
            crate::fatal!("value {:?} does not fit parameter `{}` ({:?})", value, name, kind);
        }
        match value {
            Value::Bool(b) => self.put(&[u8::from(*b)]),
            Value::U8(v) => self.put(&v.to_le_bytes()),
            Value::U16(v) => self.put(&v.to_le_bytes()),
            Value::U32(v) | Value::Reference(v) => self.put(&v.to_le_bytes()),
            Value::U64(v) => self.put(&v.to_le_bytes()),
            Value::I8(v) => self.put(&v.to_le_bytes()),
            Value::I16(v) => self.put(&v.to_le_bytes()),
            Value::I32(v) => self.put(&v.to_le_bytes()),
            Value::I64(v) => self.put(&v.to_le_bytes()),
            Value::F64(v) => self.put(&v.to_le_bytes()),
            Value::Str(s) => {
                self.put_u32(s.len() as u32);
                self.put(s.as_bytes());
            }
            Value::Array(items) => {
                self.put_u32(items.len() as u32);
                if let ParamKind::Array { element, .. } = kind {
                    let elem = ParamKind::Scalar(*element);
                    for item in items {
                        self.put_value(name, &elem, item);
                    }
                }
            }
        }
    }

    fn put_params<'a>(
        &mut self,
        params: impl Iterator<Item = &'a ParamSpec>,
        values: &[Value],
        context: &str,
    ) {
        let params: Vec<&ParamSpec> = params.collect();
        if params.len() != values.len() {
            crate::fatal!(
                "`{}`: {} values for {} parameters",
                context,
                values.len(),
                params.len()
            );
        }
        for (spec, value) in params.into_iter().zip(values) {
            self.put_value(spec.name, &spec.kind, value);
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Buffer {
        self.buf
    }
}

impl Default for Packer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Unpacker ─────────────────────────────────────────────────

/// Bounds-checked cursor over a received buffer.
pub struct Unpacker<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Unpacker<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    fn scalar(&mut self, kind: ScalarKind) -> Result<Value, DecodeError> {
        Ok(match kind {
            ScalarKind::Bool => match self.take_array::<1>()?[0] {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(DecodeError::InvalidBool(other)),
            },
            ScalarKind::U8 => Value::U8(u8::from_le_bytes(self.take_array()?)),
            ScalarKind::U16 => Value::U16(u16::from_le_bytes(self.take_array()?)),
            ScalarKind::U32 => Value::U32(u32::from_le_bytes(self.take_array()?)),
            ScalarKind::U64 => Value::U64(u64::from_le_bytes(self.take_array()?)),
            ScalarKind::I8 => Value::I8(i8::from_le_bytes(self.take_array()?)),
            ScalarKind::I16 => Value::I16(i16::from_le_bytes(self.take_array()?)),
            ScalarKind::I32 => Value::I32(i32::from_le_bytes(self.take_array()?)),
            ScalarKind::I64 => Value::I64(i64::from_le_bytes(self.take_array()?)),
            ScalarKind::F64 => Value::F64(f64::from_le_bytes(self.take_array()?)),
        })
    }

    /// Read one value of `kind`.
    pub fn value(&mut self, kind: &ParamKind) -> Result<Value, DecodeError> {
        match kind {
            ParamKind::Scalar(s) => self.scalar(*s),
            ParamKind::String { max_len } => {
                let declared = self.u32()? as usize;
                if declared > *max_len as usize {
                    return Err(DecodeError::StringTooLong {
                        declared,
                        max: *max_len as usize,
                    });
                }
                let bytes = self.take(declared)?;
                let s = core::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
                Ok(Value::Str(s.to_owned()))
            }
            ParamKind::Array { element, max_count } => {
                let declared = self.u32()? as usize;
                if declared > *max_count as usize {
                    return Err(DecodeError::ArrayTooLong {
                        declared,
                        max: *max_count as usize,
                    });
                }
                // Check the whole body is present before allocating for it.
                let needed = declared * element.size();
                if needed > self.remaining() {
                    return Err(DecodeError::Truncated {
                        needed,
                        available: self.remaining(),
                    });
                }
                let mut items = Vec::with_capacity(declared);
                for _ in 0..declared {
                    items.push(self.scalar(*element)?);
                }
                Ok(Value::Array(items))
            }
            ParamKind::Reference | ParamKind::Callback(_) => Ok(Value::Reference(self.u32()?)),
        }
    }

    fn params<'s>(
        &mut self,
        params: impl Iterator<Item = &'s ParamSpec>,
    ) -> Result<Vec<Value>, DecodeError> {
        params.map(|p| self.value(&p.kind)).collect()
    }

    /// Fail unless every byte was consumed.
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

// ── Calls ────────────────────────────────────────────────────

/// An unpacked request buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCall {
    /// Bit `i` set: output `i` must be in the response.
    pub outputs_mask: u32,
    pub inputs: Vec<Value>,
}

/// Pack a request: the required-outputs mask (only when the operation
/// has outputs), then the inputs.
pub fn pack_call(op: &OperationSpec, outputs_mask: u32, inputs: &[Value]) -> Buffer {
    let mut p = Packer::new();
    if op.has_outputs() {
        if outputs_mask & !op.all_outputs_mask() != 0 {
            crate::fatal!("`{}`: output mask {:#x} names missing outputs", op.name, outputs_mask);
        }
        p.put_u32(outputs_mask);
    }
    p.put_params(op.inputs(), inputs, op.name);
    p.finish()
}

pub fn unpack_call(op: &OperationSpec, buf: &[u8]) -> Result<DecodedCall, DecodeError> {
    let mut u = Unpacker::new(buf);
    let outputs_mask = if op.has_outputs() {
        let mask = u.u32()?;
        if mask & !op.all_outputs_mask() != 0 {
            return Err(DecodeError::UnknownOutputBits {
                mask,
                outputs: op.output_count(),
            });
        }
        mask
    } else {
        0
    };
    let inputs = u.params(op.inputs())?;
    u.finish()?;
    Ok(DecodedCall {
        outputs_mask,
        inputs,
    })
}

// ── Responses ────────────────────────────────────────────────

/// An unpacked response buffer. `outputs[i]` is `None` when output `i`
/// was not requested.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResponse {
    pub result: Option<Value>,
    pub outputs: Vec<Option<Value>>,
}

/// Pack a response: the return value (if the operation has one), then
/// each requested output in schema order. A requested output the handler
/// left as `None` is packed as its kind's default; unrequested outputs are
/// skipped.
pub fn pack_response(
    op: &OperationSpec,
    outputs_mask: u32,
    result: Option<&Value>,
    outputs: &[Option<Value>],
) -> Buffer {
    let mut p = Packer::new();
    if let Some(kind) = &op.returns {
        match result {
            Some(v) => p.put_value("return", kind, v),
            None => p.put_value("return", kind, &Value::default_for(kind)),
        }
    }
    for (i, spec) in op.outputs().enumerate() {
        if outputs_mask & (1 << i) == 0 {
            continue;
        }
        match outputs.get(i).and_then(Option::as_ref) {
            Some(v) => p.put_value(spec.name, &spec.kind, v),
            None => p.put_value(spec.name, &spec.kind, &Value::default_for(&spec.kind)),
        }
    }
    p.finish()
}

pub fn unpack_response(
    op: &OperationSpec,
    outputs_mask: u32,
    buf: &[u8],
) -> Result<DecodedResponse, DecodeError> {
    let mut u = Unpacker::new(buf);
    let result = op.returns.as_ref().map(|k| u.value(k)).transpose()?;
    let mut outputs = Vec::with_capacity(op.output_count());
    for (i, spec) in op.outputs().enumerate() {
        if outputs_mask & (1 << i) == 0 {
            outputs.push(None);
        } else {
            outputs.push(Some(u.value(&spec.kind)?));
        }
    }
    u.finish()?;
    Ok(DecodedResponse { result, outputs })
}

// ── Events ───────────────────────────────────────────────────

/// An unpacked event buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    /// The caller's opaque context, echoed back.
    pub context: u32,
    pub params: Vec<Value>,
}

/// Pack an event: the subscriber's context value, then the callback
/// parameters.
pub fn pack_event(cb: &CallbackSpec, context: u32, params: &[Value]) -> Buffer {
    let mut p = Packer::new();
    p.put_u32(context);
    p.put_params(cb.params.iter(), params, cb.name);
    p.finish()
}

pub fn unpack_event(cb: &CallbackSpec, buf: &[u8]) -> Result<DecodedEvent, DecodeError> {
    let mut u = Unpacker::new(buf);
    let context = u.u32()?;
    let params = u.params(cb.params.iter())?;
    u.finish()?;
    Ok(DecodedEvent { context, params })
}

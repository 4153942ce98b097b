//! Dynamically typed parameter values.
//!
//! The codec is schema-driven rather than generated, so parameters travel
//! between the codec and handler code as [`Value`]s. A value is only ever
//! packed against a [`ParamKind`] it [`matches`](Value::matches).

use crate::schema::{ParamKind, ScalarKind};

/// One packed or unpacked parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
    Array(Vec<Value>),
    /// Opaque handle, or the caller's context value for a callback.
    Reference(u32),
}

impl Value {
    /// Zero value for a scalar kind.
    pub fn zero(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Bool => Self::Bool(false),
            ScalarKind::U8 => Self::U8(0),
            ScalarKind::U16 => Self::U16(0),
            ScalarKind::U32 => Self::U32(0),
            ScalarKind::U64 => Self::U64(0),
            ScalarKind::I8 => Self::I8(0),
            ScalarKind::I16 => Self::I16(0),
            ScalarKind::I32 => Self::I32(0),
            ScalarKind::I64 => Self::I64(0),
            ScalarKind::F64 => Self::F64(0.0),
        }
    }

    /// What gets packed for a requested output the handler left unset.
    pub fn default_for(kind: &ParamKind) -> Self {
        match kind {
            ParamKind::Scalar(s) => Self::zero(*s),
            ParamKind::String { .. } => Self::Str(String::new()),
            ParamKind::Array { .. } => Self::Array(Vec::new()),
            ParamKind::Reference | ParamKind::Callback(_) => Self::Reference(0),
        }
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        Some(match self {
            Self::Bool(_) => ScalarKind::Bool,
            Self::U8(_) => ScalarKind::U8,
            Self::U16(_) => ScalarKind::U16,
            Self::U32(_) => ScalarKind::U32,
            Self::U64(_) => ScalarKind::U64,
            Self::I8(_) => ScalarKind::I8,
            Self::I16(_) => ScalarKind::I16,
            Self::I32(_) => ScalarKind::I32,
            Self::I64(_) => ScalarKind::I64,
            Self::F64(_) => ScalarKind::F64,
            Self::Str(_) | Self::Array(_) | Self::Reference(_) => return None,
        })
    }

    /// Whether this value can be packed as `kind`, bounds included.
    pub fn matches(&self, kind: &ParamKind) -> bool {
        match (self, kind) {
            (_, ParamKind::Scalar(s)) => self.scalar_kind() == Some(*s),
            (Self::Str(s), ParamKind::String { max_len }) => s.len() <= *max_len as usize,
            (Self::Array(items), ParamKind::Array { element, max_count }) => {
                items.len() <= *max_count as usize
                    && items.iter().all(|v| v.scalar_kind() == Some(*element))
            }
            (Self::Reference(_), ParamKind::Reference | ParamKind::Callback(_)) => true,
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Signed integers up to 32 bits, widened.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I8(v) => Some((*v).into()),
            Self::I16(v) => Some((*v).into()),
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Unsigned integers up to 32 bits, widened.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U8(v) => Some((*v).into()),
            Self::U16(v) => Some((*v).into()),
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<u32> {
        match self {
            Self::Reference(r) => Some(*r),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Self::$variant(v)
            }
        })*
    };
}

impl_from! {
    bool => Bool,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f64 => F64,
    String => Str,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

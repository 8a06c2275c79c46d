//! Primitive field types and the dynamic [`Value`] read from and written to
//! foreign memory.

use std::fmt;
use std::mem;

use crate::error::{FfiError, FfiResult};
use crate::opaque::OpaqueValue;
use crate::pointer::Pointer;
use crate::structs::StructValue;

/// Primitive C type of a struct member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfiType {
    /// 8-bit signed integer.
    I8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 8-bit unsigned integer.
    U8,
    /// 16-bit unsigned integer.
    U16,
    /// 32-bit unsigned integer.
    U32,
    /// 64-bit unsigned integer.
    U64,
    /// 32-bit floating point.
    F32,
    /// 64-bit floating point.
    F64,
    /// Untyped pointer (void*).
    Pointer,
    /// Boolean (one byte).
    Bool,
    /// Size type (size_t).
    Size,
}

impl FfiType {
    /// Get the size of this type in bytes.
    pub fn size(&self) -> usize {
        match self {
            FfiType::I8 | FfiType::U8 | FfiType::Bool => 1,
            FfiType::I16 | FfiType::U16 => 2,
            FfiType::I32 | FfiType::U32 | FfiType::F32 => 4,
            FfiType::I64 | FfiType::U64 | FfiType::F64 => 8,
            FfiType::Pointer | FfiType::Size => mem::size_of::<usize>(),
        }
    }

    /// Get the alignment of this type.
    pub fn alignment(&self) -> usize {
        self.size().max(1)
    }

    /// C-style name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            FfiType::I8 => "int8",
            FfiType::I16 => "int16",
            FfiType::I32 => "int32",
            FfiType::I64 => "int64",
            FfiType::U8 => "uint8",
            FfiType::U16 => "uint16",
            FfiType::U32 => "uint32",
            FfiType::U64 => "uint64",
            FfiType::F32 => "float",
            FfiType::F64 => "double",
            FfiType::Pointer => "pointer",
            FfiType::Bool => "bool",
            FfiType::Size => "size_t",
        }
    }

    /// Decode a value from exactly `self.size()` native-endian bytes.
    pub(crate) fn decode(&self, bytes: &[u8]) -> Value {
        fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
            let mut out = [0u8; N];
            out.copy_from_slice(&bytes[..N]);
            out
        }

        match self {
            FfiType::I8 => Value::I8(i8::from_ne_bytes(array(bytes))),
            FfiType::I16 => Value::I16(i16::from_ne_bytes(array(bytes))),
            FfiType::I32 => Value::I32(i32::from_ne_bytes(array(bytes))),
            FfiType::I64 => Value::I64(i64::from_ne_bytes(array(bytes))),
            FfiType::U8 => Value::U8(bytes[0]),
            FfiType::U16 => Value::U16(u16::from_ne_bytes(array(bytes))),
            FfiType::U32 => Value::U32(u32::from_ne_bytes(array(bytes))),
            FfiType::U64 => Value::U64(u64::from_ne_bytes(array(bytes))),
            FfiType::F32 => Value::F32(f32::from_ne_bytes(array(bytes))),
            FfiType::F64 => Value::F64(f64::from_ne_bytes(array(bytes))),
            FfiType::Bool => Value::Bool(bytes[0] != 0),
            FfiType::Pointer => Value::Pointer(Pointer::new(usize::from_ne_bytes(array(bytes)))),
            FfiType::Size => Value::Size(usize::from_ne_bytes(array(bytes))),
        }
    }

    /// Encode `value` as native-endian bytes of this type.
    ///
    /// Integers are range-checked, integers are accepted for float fields, finite floats must fit `f32`, and
    /// pointer fields take pointers, nil (null) or wrapped values (their address).
    pub(crate) fn encode(&self, value: &Value) -> FfiResult<Vec<u8>> {
        let invalid = || FfiError::InvalidValue {
            expected: self.name().to_string(),
            received: value.describe(),
        };

        macro_rules! int {
            ($t:ty) => {{
                let n = value.as_i128().ok_or_else(invalid)?;
                <$t>::try_from(n).map_err(|_| invalid())?.to_ne_bytes().to_vec()
            }};
        }

        let bytes = match self {
            FfiType::I8 => int!(i8),
            FfiType::I16 => int!(i16),
            FfiType::I32 => int!(i32),
            FfiType::I64 => int!(i64),
            FfiType::U8 => int!(u8),
            FfiType::U16 => int!(u16),
            FfiType::U32 => int!(u32),
            FfiType::U64 => int!(u64),
            FfiType::Size => int!(usize),
            FfiType::F32 => {
                let v = value.as_f64().ok_or_else(invalid)?;
                // Finite values must stay finite; inf and NaN pass through.
                if v.is_finite() && v.abs() > f32::MAX as f64 {
                    return Err(invalid());
                }
                (v as f32).to_ne_bytes().to_vec()
            }
            FfiType::F64 => value.as_f64().ok_or_else(invalid)?.to_ne_bytes().to_vec(),
            FfiType::Bool => match value {
                Value::Bool(b) => vec![u8::from(*b)],
                other => vec![u8::from(other.as_i128().ok_or_else(invalid)? != 0)],
            },
            FfiType::Pointer => value
                .address()
                .ok_or_else(invalid)?
                .to_ne_bytes()
                .to_vec(),
        };
        Ok(bytes)
    }
}

impl fmt::Display for FfiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A member value read from or written to foreign memory.
#[derive(Debug, Clone)]
pub enum Value {
    /// No value (null pointer read, or unreadable null memory).
    Nil,
    /// Boolean.
    Bool(bool),
    /// 8-bit signed integer.
    I8(i8),
    /// 16-bit signed integer.
    I16(i16),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 8-bit unsigned integer.
    U8(u8),
    /// 16-bit unsigned integer.
    U16(u16),
    /// 32-bit unsigned integer.
    U32(u32),
    /// 64-bit unsigned integer.
    U64(u64),
    /// 32-bit floating point.
    F32(f32),
    /// 64-bit floating point.
    F64(f64),
    /// Size.
    Size(usize),
    /// Untyped pointer.
    Pointer(Pointer),
    /// Struct instance (typed pointer target or embedded view).
    Struct(StructValue),
    /// Opaque instance.
    Opaque(OpaqueValue),
}

impl Value {
    /// Short name of the variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Size(_) => "usize",
            Value::Pointer(_) => "pointer",
            Value::Struct(_) => "struct",
            Value::Opaque(_) => "opaque",
        }
    }

    /// Value and kind, e.g. `5 (i32)`.
    pub fn describe(&self) -> String {
        format!("{} ({})", self, self.kind_name())
    }

    /// Check if this is [`Value::Nil`].
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Try to convert to a wide integer.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::I8(v) => Some(*v as i128),
            Value::I16(v) => Some(*v as i128),
            Value::I32(v) => Some(*v as i128),
            Value::I64(v) => Some(*v as i128),
            Value::U8(v) => Some(*v as i128),
            Value::U16(v) => Some(*v as i128),
            Value::U32(v) => Some(*v as i128),
            Value::U64(v) => Some(*v as i128),
            Value::Size(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// Try to convert to i64.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|n| i64::try_from(n).ok())
    }

    /// Try to convert to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            other => other.as_i128().map(|n| n as f64),
        }
    }

    /// Try to convert to bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get a struct instance.
    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get an opaque instance.
    pub fn as_opaque(&self) -> Option<&OpaqueValue> {
        match self {
            Value::Opaque(o) => Some(o),
            _ => None,
        }
    }

    /// Address this value stands for when stored in a pointer field.
    pub fn address(&self) -> Option<usize> {
        match self {
            Value::Nil => Some(0),
            Value::Pointer(p) => Some(p.address()),
            Value::Struct(s) => Some(s.address()),
            Value::Opaque(o) => Some(o.address()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Primitives compare by value; wrapped instances by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U8(a), Value::U8(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Size(a), Value::Size(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a.same_instance(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.same_instance(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{:?}", v),
            Value::F64(v) => write!(f, "{:?}", v),
            Value::Size(v) => write!(f, "{}", v),
            Value::Pointer(p) if p.is_null() => f.write_str("NULL"),
            Value::Pointer(p) => write!(f, "{:#x}", p.address()),
            // Nested instances render as a short token to keep cyclic layouts finite.
            Value::Struct(s) => f.write_str(&s.token()),
            Value::Opaque(o) => f.write_str(&o.token()),
        }
    }
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    usize => Size,
    Pointer => Pointer,
    StructValue => Struct,
    OpaqueValue => Opaque,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffi_type_size() {
        assert_eq!(FfiType::I8.size(), 1);
        assert_eq!(FfiType::I16.size(), 2);
        assert_eq!(FfiType::I32.size(), 4);
        assert_eq!(FfiType::I64.size(), 8);
        assert_eq!(FfiType::F32.size(), 4);
        assert_eq!(FfiType::F64.size(), 8);
        assert_eq!(FfiType::Bool.size(), 1);
        assert_eq!(FfiType::Pointer.size(), mem::size_of::<usize>());
    }

    #[test]
    fn test_encode_decode() {
        let bytes = FfiType::I16.encode(&Value::I32(-300)).unwrap();
        assert_eq!(FfiType::I16.decode(&bytes), Value::I16(-300));

        let bytes = FfiType::F32.encode(&Value::U8(3)).unwrap();
        assert_eq!(FfiType::F32.decode(&bytes), Value::F32(3.0));

        let bytes = FfiType::Pointer.encode(&Value::Nil).unwrap();
        assert_eq!(FfiType::Pointer.decode(&bytes), Value::Pointer(Pointer::null()));
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        let err = FfiType::U8.encode(&Value::I32(256)).unwrap_err();
        assert!(matches!(err, FfiError::InvalidValue { .. }));
        assert!(err.to_string().contains("256 (i32)"));

        assert!(FfiType::I32.encode(&Value::F64(1.5)).is_err());
        assert!(FfiType::U32.encode(&Value::I8(-1)).is_err());
    }

    #[test]
    fn test_f32_encode_rejects_overflow() {
        let err = FfiType::F32.encode(&Value::F64(1e39)).unwrap_err();
        assert!(matches!(err, FfiError::InvalidValue { .. }));
        assert!(FfiType::F32.encode(&Value::F64(-1e39)).is_err());

        let max = FfiType::F32.encode(&Value::F64(f32::MAX as f64)).unwrap();
        assert_eq!(max, f32::MAX.to_ne_bytes().to_vec());
        let inf = FfiType::F32.encode(&Value::F64(f64::INFINITY)).unwrap();
        assert_eq!(inf, f32::INFINITY.to_ne_bytes().to_vec());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Nil.to_string(), "NULL");
        assert_eq!(Value::F32(2.0).to_string(), "2.0");
        assert_eq!(Value::Pointer(Pointer::null()).to_string(), "NULL");
        assert_eq!(Value::Pointer(Pointer::new(0x20)).to_string(), "0x20");
        assert_eq!(Value::I32(5).describe(), "5 (i32)");
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::U16(7).as_i64(), Some(7));
        assert_eq!(Value::F32(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Bool(true).as_i64(), None);
        assert_eq!(Value::from(3u8), Value::U8(3));
        assert_ne!(Value::U8(3), Value::I8(3));
    }
}

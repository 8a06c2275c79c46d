//! Typed pointers: a pointer whose target type is known, so reads materialize
//! an instance of that type and writes accept only instances of it.

use std::fmt;
use std::sync::Arc;

use crate::error::{FfiError, FfiResult};
use crate::layout::StructType;
use crate::opaque::OpaqueType;
use crate::pointer::Handle;
use crate::types::Value;

/// A struct or opaque type that a typed pointer can refer to.
#[derive(Clone)]
pub enum ForeignType {
    /// A struct type.
    Struct(Arc<StructType>),
    /// An opaque type.
    Opaque(Arc<OpaqueType>),
}

impl ForeignType {
    /// Type name.
    pub fn name(&self) -> &str {
        match self {
            ForeignType::Struct(t) => t.name(),
            ForeignType::Opaque(t) => t.name(),
        }
    }

    /// Check if both refer to the same type descriptor.
    pub fn ptr_eq(&self, other: &ForeignType) -> bool {
        match (self, other) {
            (ForeignType::Struct(a), ForeignType::Struct(b)) => Arc::ptr_eq(a, b),
            (ForeignType::Opaque(a), ForeignType::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Handle of `value` if it is an instance of exactly this type.
    fn instance_handle(&self, value: &Value) -> Option<Handle> {
        match (self, value) {
            (ForeignType::Struct(t), Value::Struct(s)) if Arc::ptr_eq(t, s.struct_type()) => {
                Some(s.handle().clone())
            }
            (ForeignType::Opaque(t), Value::Opaque(o)) if Arc::ptr_eq(t, o.opaque_type()) => {
                Some(o.handle().clone())
            }
            _ => None,
        }
    }
}

impl From<Arc<StructType>> for ForeignType {
    fn from(t: Arc<StructType>) -> Self {
        ForeignType::Struct(t)
    }
}

impl From<Arc<OpaqueType>> for ForeignType {
    fn from(t: Arc<OpaqueType>) -> Self {
        ForeignType::Opaque(t)
    }
}

/// Descriptor of a pointer to a specific struct or opaque type.
#[derive(Clone)]
pub struct TypedPointer {
    target: ForeignType,
}

impl TypedPointer {
    /// Create a typed pointer to `target`.
    pub fn new(target: impl Into<ForeignType>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// The target type.
    pub fn target(&self) -> &ForeignType {
        &self.target
    }

    /// Name of the target type.
    pub fn type_name(&self) -> &str {
        self.target.name()
    }

    /// Turn a native handle into a value of the target type.
    ///
    /// A null handle becomes [`Value::Nil`]. Plain pointers are autoreleased
    /// according to the target type's policy and the default options.
    pub fn wrap(&self, handle: impl Into<Handle>) -> FfiResult<Value> {
        let handle = handle.into();
        if handle.is_null() {
            return Ok(Value::Nil);
        }
        match &self.target {
            ForeignType::Struct(t) => Ok(Value::Struct(t.wrap(handle))),
            ForeignType::Opaque(t) => t.wrap(handle).map(Value::Opaque),
        }
    }

    /// Turn a value of the target type back into its native handle.
    pub fn unwrap(&self, value: &Value) -> FfiResult<Handle> {
        self.target.instance_handle(value).ok_or_else(|| {
            FfiError::type_mismatch(format!(
                "expected an instance of {}, got {}",
                self.type_name(),
                value.describe()
            ))
        })
    }
}

impl PartialEq for TypedPointer {
    fn eq(&self, other: &Self) -> bool {
        self.target.ptr_eq(&other.target)
    }
}

impl Eq for TypedPointer {}

impl fmt::Display for TypedPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<TypedPointer[ {} ]>", self.type_name())
    }
}

impl fmt::Debug for TypedPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

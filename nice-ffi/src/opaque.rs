//! Opaque foreign types: a handle with a name and a release policy, but no
//! visible members.

use std::fmt;
use std::sync::Arc;

use crate::autorelease::{AutoRelease, Release, WrapOptions};
use crate::error::{FfiError, FfiResult};
use crate::layout::Member;
use crate::pointer::{Handle, Pointer};
use crate::typed::{ForeignType, TypedPointer};
use crate::types::Value;

/// Descriptor of an opaque foreign type.
pub struct OpaqueType {
    name: String,
    autorelease: Arc<AutoRelease>,
}

impl OpaqueType {
    /// Declare an opaque type without a release capability.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), None)
    }

    /// Declare an opaque type released through `release`.
    pub fn with_release<R: Release + 'static>(name: impl Into<String>, release: R) -> Arc<Self> {
        Self::build(name.into(), Some(Arc::new(release)))
    }

    fn build(name: String, release: Option<Arc<dyn Release>>) -> Arc<Self> {
        Arc::new(Self {
            autorelease: AutoRelease::new(name.clone(), release),
            name,
        })
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Always empty.
    pub fn members(&self) -> &[Member] {
        &[]
    }

    /// The autorelease policy for this type.
    pub fn autorelease(&self) -> &Arc<AutoRelease> {
        &self.autorelease
    }

    /// Check if the type declared a release capability.
    pub fn can_release(&self) -> bool {
        self.autorelease.can_release()
    }

    /// Typed pointer descriptor targeting this type.
    ///
    /// Each call builds a new descriptor, not a stored one. Descriptors
    /// compare by target, so every one returned here is equal.
    pub fn typed_pointer(self: &Arc<Self>) -> TypedPointer {
        TypedPointer::new(ForeignType::Opaque(Arc::clone(self)))
    }

    /// Construct an instance with the default [`WrapOptions`].
    pub fn construct(self: &Arc<Self>, source: impl Into<OpaqueSource>) -> FfiResult<OpaqueValue> {
        self.construct_with(source, WrapOptions::default())
    }

    /// Construct an instance.
    pub fn construct_with(
        self: &Arc<Self>,
        source: impl Into<OpaqueSource>,
        options: WrapOptions,
    ) -> FfiResult<OpaqueValue> {
        match source.into() {
            OpaqueSource::Handle(Handle::Memory(buffer)) => Err(FfiError::type_mismatch(format!(
                "unsupported pointer type {:?} for opaque {}",
                buffer, self.name
            ))),
            OpaqueSource::Handle(handle) => {
                let handle = self.autorelease.make_autoreleasing(handle, options.autorelease);
                Ok(OpaqueValue::bind(self, handle))
            }
            OpaqueSource::Instance(other) => {
                if !Arc::ptr_eq(other.opaque_type(), self) {
                    return Err(FfiError::type_mismatch(format!(
                        "cannot construct {} from {}",
                        self.name,
                        other.type_name()
                    )));
                }
                self.construct_with(OpaqueSource::Handle(other.handle().clone()), options)
            }
            OpaqueSource::Value(Value::Opaque(other)) => {
                self.construct_with(OpaqueSource::Instance(other), options)
            }
            OpaqueSource::Value(Value::Pointer(pointer)) => {
                self.construct_with(OpaqueSource::Handle(Handle::Raw(pointer)), options)
            }
            OpaqueSource::Value(other) => Err(FfiError::type_mismatch(format!(
                "cannot construct {} from {}",
                self.name,
                other.describe()
            ))),
        }
    }

    /// Wrap a native handle with the default options.
    pub fn wrap(self: &Arc<Self>, handle: impl Into<Handle>) -> FfiResult<OpaqueValue> {
        self.construct(OpaqueSource::Handle(handle.into()))
    }
}

impl fmt::Debug for OpaqueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueType")
            .field("name", &self.name)
            .field("can_release", &self.can_release())
            .finish()
    }
}

/// Input accepted by [`OpaqueType::construct`].
#[derive(Debug, Clone)]
pub enum OpaqueSource {
    /// A handle to wrap.
    Handle(Handle),
    /// An instance whose handle is shared.
    Instance(OpaqueValue),
    /// A dynamic value (opaque instance or pointer).
    Value(Value),
}

impl From<Handle> for OpaqueSource {
    fn from(handle: Handle) -> Self {
        OpaqueSource::Handle(handle)
    }
}

impl From<Pointer> for OpaqueSource {
    fn from(pointer: Pointer) -> Self {
        OpaqueSource::Handle(Handle::Raw(pointer))
    }
}

impl From<OpaqueValue> for OpaqueSource {
    fn from(value: OpaqueValue) -> Self {
        OpaqueSource::Instance(value)
    }
}

impl From<&OpaqueValue> for OpaqueSource {
    fn from(value: &OpaqueValue) -> Self {
        OpaqueSource::Instance(value.clone())
    }
}

impl From<Value> for OpaqueSource {
    fn from(value: Value) -> Self {
        OpaqueSource::Value(value)
    }
}

struct OpaqueInner {
    ty: Arc<OpaqueType>,
    handle: Handle,
}

/// An instance of an [`OpaqueType`].
#[derive(Clone)]
pub struct OpaqueValue {
    inner: Arc<OpaqueInner>,
}

impl OpaqueValue {
    fn bind(ty: &Arc<OpaqueType>, handle: Handle) -> Self {
        Self {
            inner: Arc::new(OpaqueInner {
                ty: Arc::clone(ty),
                handle,
            }),
        }
    }

    /// The opaque type.
    pub fn opaque_type(&self) -> &Arc<OpaqueType> {
        &self.inner.ty
    }

    /// Name of the opaque type.
    pub fn type_name(&self) -> &str {
        self.inner.ty.name()
    }

    /// Backing handle.
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Backing address as a plain pointer.
    pub fn pointer(&self) -> Pointer {
        self.inner.handle.pointer()
    }

    /// Backing address.
    pub fn address(&self) -> usize {
        self.inner.handle.address()
    }

    /// Check if the backing handle is null.
    pub fn is_null(&self) -> bool {
        self.inner.handle.is_null()
    }

    /// Identity of this instance, shared by its clones.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Check if both are the same instance.
    pub fn same_instance(&self, other: &OpaqueValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Always empty.
    pub fn members(&self) -> &[Member] {
        &[]
    }

    /// Always fails: opaque values have no members.
    pub fn get(&self, member: &str) -> FfiResult<Value> {
        Err(self.no_such_member(member))
    }

    /// Always fails: opaque values have no members.
    pub fn set(&self, member: &str, _value: impl Into<Value>) -> FfiResult<()> {
        Err(self.no_such_member(member))
    }

    fn no_such_member(&self, member: &str) -> FfiError {
        FfiError::NoSuchMember {
            type_name: self.type_name().to_string(),
            member: member.to_string(),
        }
    }

    pub(crate) fn token(&self) -> String {
        format!("#<{}:{:#x}>", self.type_name(), self.id())
    }
}

impl fmt::Display for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueValue")
            .field("type", &self.type_name())
            .field("handle", &self.inner.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::MemoryPointer;

    #[test]
    fn test_members_are_empty() {
        let ty = OpaqueType::new("Window");
        let w = ty.construct(Pointer::null()).unwrap();
        assert!(w.members().is_empty());
        assert!(ty.members().is_empty());
        assert!(matches!(w.get("title"), Err(FfiError::NoSuchMember { .. })));
        assert!(matches!(w.set("title", 1u8), Err(FfiError::NoSuchMember { .. })));
    }

    #[test]
    fn test_buffer_is_rejected() {
        let ty = OpaqueType::new("Window");
        let buffer = MemoryPointer::zeroed(16, 8).unwrap();
        let err = ty.construct(Handle::from(buffer)).unwrap_err();
        assert!(matches!(err, FfiError::TypeMismatch { .. }));
    }

    #[test]
    fn test_instance_shares_handle() {
        let ty = OpaqueType::new("Window");
        let a = ty.construct(Pointer::new(0x1000)).unwrap();
        let b = ty.construct(&a).unwrap();
        assert!(!a.same_instance(&b));
        assert!(a.handle().same_as(b.handle()));

        let other = OpaqueType::new("Surface");
        assert!(other.construct(&a).is_err());
    }

    #[test]
    fn test_display_token() {
        let ty = OpaqueType::new("Window");
        let w = ty.construct(Pointer::new(0x20)).unwrap();
        assert!(w.to_string().starts_with("#<Window:0x"));
    }
}

//! # Struct Values
//!
//! A [`StructValue`] binds a [`StructType`] to a [`Handle`]. Members are read
//! and written straight through the handle's memory; typed-pointer members are
//! materialized once and cached per instance.
//!
//! Values are constructed from a [`StructSource`]:
//!
//! | Source | Behavior |
//! |---|---|
//! | `Map` | fresh zeroed memory, every declared member set by name |
//! | `Values` | fresh zeroed memory, members set positionally |
//! | `Bytes` | fresh memory holding a copy of the bytes |
//! | `Instance` | fresh memory holding a copy of a same-type instance |
//! | `Handle` | wraps the handle in place, autoreleasing plain pointers |
//! | `Value` | a struct instance or a pointer, as above |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::autorelease::WrapOptions;
use crate::error::{FfiError, FfiResult};
use crate::layout::{FieldType, Member, StructType};
use crate::pointer::{Handle, MemoryPointer, Pointer};
use crate::typed::ForeignType;
use crate::types::{FfiType, Value};

/// Input accepted by [`StructType::construct`].
#[derive(Debug, Clone)]
pub enum StructSource {
    /// Member name to value.
    Map(HashMap<String, Value>),
    /// Values in declaration order.
    Values(Vec<Value>),
    /// Raw bytes of the whole struct.
    Bytes(Vec<u8>),
    /// An existing instance to copy.
    Instance(StructValue),
    /// A handle to wrap in place.
    Handle(Handle),
    /// A dynamic value (struct instance or pointer).
    Value(Value),
}

impl StructSource {
    /// Build a `Map` source from name/value pairs.
    pub fn fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        StructSource::Map(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<HashMap<String, Value>> for StructSource {
    fn from(map: HashMap<String, Value>) -> Self {
        StructSource::Map(map)
    }
}

impl From<Vec<Value>> for StructSource {
    fn from(values: Vec<Value>) -> Self {
        StructSource::Values(values)
    }
}

impl From<Vec<u8>> for StructSource {
    fn from(bytes: Vec<u8>) -> Self {
        StructSource::Bytes(bytes)
    }
}

impl From<StructValue> for StructSource {
    fn from(value: StructValue) -> Self {
        StructSource::Instance(value)
    }
}

impl From<&StructValue> for StructSource {
    fn from(value: &StructValue) -> Self {
        StructSource::Instance(value.clone())
    }
}

impl From<Handle> for StructSource {
    fn from(handle: Handle) -> Self {
        StructSource::Handle(handle)
    }
}

impl From<Pointer> for StructSource {
    fn from(pointer: Pointer) -> Self {
        StructSource::Handle(Handle::Raw(pointer))
    }
}

impl From<Value> for StructSource {
    fn from(value: Value) -> Self {
        StructSource::Value(value)
    }
}

impl StructType {
    /// Construct an instance with the default [`WrapOptions`].
    pub fn construct(self: &Arc<Self>, source: impl Into<StructSource>) -> FfiResult<StructValue> {
        self.construct_with(source, WrapOptions::default())
    }

    /// Construct an instance.
    ///
    /// `options` only matters for handle sources; copies always live in
    /// memory owned by the new instance.
    pub fn construct_with(
        self: &Arc<Self>,
        source: impl Into<StructSource>,
        options: WrapOptions,
    ) -> FfiResult<StructValue> {
        match source.into() {
            StructSource::Map(map) => {
                let value = self.allocate()?;
                for (index, member) in self.members().iter().enumerate() {
                    let field = map.get(member.name()).ok_or_else(|| FfiError::MissingMember {
                        type_name: self.name().to_string(),
                        member: member.name().to_string(),
                    })?;
                    value.set_index(index, field.clone())?;
                }
                Ok(value)
            }
            StructSource::Values(values) => {
                if values.len() != self.members().len() {
                    return Err(FfiError::ArityMismatch {
                        type_name: self.name().to_string(),
                        expected: self.members().len(),
                        received: values.len(),
                    });
                }
                let value = self.allocate()?;
                for (index, field) in values.into_iter().enumerate() {
                    value.set_index(index, field)?;
                }
                Ok(value)
            }
            StructSource::Bytes(bytes) => {
                if bytes.len() != self.size() {
                    return Err(FfiError::SizeMismatch {
                        type_name: self.name().to_string(),
                        expected: self.size(),
                        received: bytes.len(),
                    });
                }
                let buffer = MemoryPointer::from_bytes(&bytes, self.alignment())?;
                Ok(StructValue::bind(self, Handle::Memory(buffer)))
            }
            StructSource::Instance(other) => {
                if !Arc::ptr_eq(other.struct_type(), self) {
                    return Err(FfiError::type_mismatch(format!(
                        "cannot copy {} into {}",
                        other.type_name(),
                        self.name()
                    )));
                }
                let values = other.to_values()?;
                self.construct_with(StructSource::Values(values), options)
            }
            StructSource::Handle(handle) => {
                let handle = self.autorelease.make_autoreleasing(handle, options.autorelease);
                Ok(StructValue::bind(self, handle))
            }
            StructSource::Value(Value::Struct(other)) => {
                self.construct_with(StructSource::Instance(other), options)
            }
            StructSource::Value(Value::Pointer(pointer)) => {
                self.construct_with(StructSource::Handle(Handle::Raw(pointer)), options)
            }
            StructSource::Value(other) => Err(FfiError::type_mismatch(format!(
                "cannot construct {} from {}",
                self.name(),
                other.describe()
            ))),
        }
    }

    /// Wrap a native handle in place with the default options.
    pub fn wrap(self: &Arc<Self>, handle: impl Into<Handle>) -> StructValue {
        let handle = self
            .autorelease
            .make_autoreleasing(handle.into(), WrapOptions::default().autorelease);
        StructValue::bind(self, handle)
    }

    fn allocate(self: &Arc<Self>) -> FfiResult<StructValue> {
        let buffer = MemoryPointer::zeroed(self.size(), self.alignment())?;
        Ok(StructValue::bind(self, Handle::Memory(buffer)))
    }
}

struct StructInner {
    ty: Arc<StructType>,
    handle: Handle,
    cache: Mutex<HashMap<usize, Value>>,
}

/// An instance of a [`StructType`] bound to foreign memory.
///
/// Clones share memory, handle and member cache.
#[derive(Clone)]
pub struct StructValue {
    inner: Arc<StructInner>,
}

impl StructValue {
    pub(crate) fn bind(ty: &Arc<StructType>, handle: Handle) -> Self {
        Self {
            inner: Arc::new(StructInner {
                ty: Arc::clone(ty),
                handle,
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The struct type.
    pub fn struct_type(&self) -> &Arc<StructType> {
        &self.inner.ty
    }

    /// Name of the struct type.
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
    pub fn same_instance(&self, other: &StructValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Read a member, including hidden ones.
    pub fn get(&self, member: &str) -> FfiResult<Value> {
        let index = self.inner.ty.member_index(member)?;
        self.get_index(index)
    }

    /// Write a member, including hidden and read-only ones.
    pub fn set(&self, member: &str, value: impl Into<Value>) -> FfiResult<()> {
        let index = self.inner.ty.member_index(member)?;
        self.set_index(index, value.into())
    }

    /// Call the generated reader for `accessor`.
    pub fn read(&self, accessor: &str) -> FfiResult<Value> {
        let index = self.inner.ty.reader(accessor)?;
        self.get_index(index)
    }

    /// Call the generated writer for `accessor`.
    pub fn write(&self, accessor: &str, value: impl Into<Value>) -> FfiResult<()> {
        let index = self.inner.ty.writer(accessor)?;
        self.set_index(index, value.into())
    }

    /// All member values in declaration order.
    pub fn to_values(&self) -> FfiResult<Vec<Value>> {
        (0..self.inner.ty.members().len())
            .map(|index| self.get_index(index))
            .collect()
    }

    /// All member values by name.
    pub fn to_map(&self) -> FfiResult<HashMap<String, Value>> {
        self.inner
            .ty
            .members()
            .iter()
            .enumerate()
            .map(|(index, member)| Ok((member.name().to_string(), self.get_index(index)?)))
            .collect()
    }

    /// Copy of the raw bytes.
    pub fn to_bytes(&self) -> FfiResult<Vec<u8>> {
        self.inner.handle.read_bytes(0, self.inner.ty.size())
    }

    /// Human-readable dump of the visible members, e.g.
    /// `#<Point:0x55d0c1a0 x=1, y=2>`.
    pub fn describe(&self) -> String {
        let fields: Vec<String> = self
            .inner
            .ty
            .members()
            .iter()
            .enumerate()
            .filter(|(_, member)| !member.is_hidden())
            .map(|(index, member)| match self.get_index(index) {
                Ok(value) => format!("{}={}", member.name(), value),
                Err(_) => format!("{}=?", member.name()),
            })
            .collect();

        if fields.is_empty() {
            self.token()
        } else {
            format!("#<{}:{:#x} {}>", self.type_name(), self.id(), fields.join(", "))
        }
    }

    /// Short identity token used when nested inside another dump.
    pub(crate) fn token(&self) -> String {
        format!("#<{}:{:#x}>", self.type_name(), self.id())
    }

    fn member(&self, index: usize) -> &Member {
        &self.inner.ty.members()[index]
    }

    fn get_index(&self, index: usize) -> FfiResult<Value> {
        let member = self.member(index);
        match member.field_type() {
            FieldType::Primitive(ty) => {
                match self.inner.handle.read_bytes(member.offset(), ty.size()) {
                    Ok(bytes) => Ok(ty.decode(&bytes)),
                    Err(FfiError::NullPointer) => Ok(Value::Nil),
                    Err(e) => Err(e),
                }
            }
            FieldType::Struct(embedded) => {
                if self.is_null() {
                    return Ok(Value::Nil);
                }
                let view = self.inner.handle.offset(member.offset());
                Ok(Value::Struct(StructValue::bind(embedded, view)))
            }
            FieldType::Typed(tp) => self.read_typed(index, tp.target().clone()),
            FieldType::SelfPointer => {
                self.read_typed(index, ForeignType::Struct(Arc::clone(&self.inner.ty)))
            }
        }
    }

    fn read_typed(&self, index: usize, target: ForeignType) -> FfiResult<Value> {
        let mut cache = self.inner.cache.lock();
        if let Some(value) = cache.get(&index) {
            return Ok(value.clone());
        }

        let address = match self.read_address(self.member(index).offset()) {
            Ok(address) => address,
            Err(FfiError::NullPointer) => return Ok(Value::Nil),
            Err(e) => return Err(e),
        };
        if address == 0 {
            return Ok(Value::Nil);
        }

        let value = match target {
            ForeignType::Struct(ty) => Value::Struct(ty.wrap(Pointer::new(address))),
            ForeignType::Opaque(ty) => Value::Opaque(ty.wrap(Pointer::new(address))?),
        };
        cache.insert(index, value.clone());
        Ok(value)
    }

    fn read_address(&self, offset: usize) -> FfiResult<usize> {
        let bytes = self.inner.handle.read_bytes(offset, FfiType::Pointer.size())?;
        Ok(FfiType::Pointer.decode(&bytes).address().unwrap_or(0))
    }

    fn set_index(&self, index: usize, value: Value) -> FfiResult<()> {
        let member = self.member(index);
        match member.field_type() {
            FieldType::Primitive(ty) => {
                let bytes = ty.encode(&value)?;
                self.inner.handle.write_bytes(member.offset(), &bytes)
            }
            FieldType::Struct(embedded) => {
                let source = match &value {
                    Value::Struct(s) if Arc::ptr_eq(s.struct_type(), embedded) => s,
                    other => {
                        return Err(FfiError::type_mismatch(format!(
                            "cannot assign {} to {}.{} (struct {})",
                            other.describe(),
                            self.type_name(),
                            member.name(),
                            embedded.name()
                        )))
                    }
                };
                let bytes = source.to_bytes()?;
                self.inner.handle.write_bytes(member.offset(), &bytes)
            }
            // Nil stores a null pointer, matching what a null member reads as.
            FieldType::Typed(_) | FieldType::SelfPointer if value.is_nil() => {
                self.write_typed(index, 0)
            }
            FieldType::Typed(tp) => {
                let target = tp.unwrap(&value)?;
                self.write_typed(index, target.address())
            }
            FieldType::SelfPointer => {
                let target = self.inner.ty.typed_pointer().unwrap(&value)?;
                self.write_typed(index, target.address())
            }
        }
    }

    fn write_typed(&self, index: usize, address: usize) -> FfiResult<()> {
        let offset = self.member(index).offset();
        self.inner.handle.write_bytes(offset, &address.to_ne_bytes())?;
        self.inner.cache.lock().remove(&index);
        Ok(())
    }
}

impl fmt::Display for StructValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl fmt::Debug for StructValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructValue")
            .field("type", &self.type_name())
            .field("handle", &self.inner.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Arc<StructType> {
        StructType::builder("Point")
            .layout([("x", FfiType::I32), ("y", FfiType::I32)])
            .build()
            .unwrap()
    }

    #[test]
    fn test_construct_from_values_and_read_back() {
        let ty = point();
        let p = ty.construct(vec![Value::I32(3), Value::I32(-4)]).unwrap();
        assert_eq!(p.get("x").unwrap(), Value::I32(3));
        assert_eq!(p.get("y").unwrap(), Value::I32(-4));
        assert_eq!(p.handle().kind(), crate::pointer::HandleKind::Memory);
    }

    #[test]
    fn test_fresh_memory_is_zeroed() {
        let ty = point();
        let p = ty.construct(StructSource::fields([("x", 0i32), ("y", 0i32)])).unwrap();
        assert_eq!(p.to_bytes().unwrap(), vec![0; 8]);
    }

    #[test]
    fn test_null_handle_reads_nil() {
        let ty = point();
        let p = ty.construct_with(Pointer::null(), WrapOptions::manual()).unwrap();
        assert!(p.is_null());
        assert_eq!(p.get("x").unwrap(), Value::Nil);
        assert!(matches!(p.set("x", 1i32), Err(FfiError::NullPointer)));
    }

    #[test]
    fn test_clones_share_identity() {
        let ty = point();
        let p = ty.construct(vec![Value::I32(1), Value::I32(2)]).unwrap();
        let q = p.clone();
        assert!(p.same_instance(&q));
        assert_eq!(p.id(), q.id());
        q.set("x", 10i32).unwrap();
        assert_eq!(p.get("x").unwrap(), Value::I32(10));
    }

    #[test]
    fn test_describe_format() {
        let ty = point();
        let p = ty.construct(vec![Value::I32(1), Value::I32(2)]).unwrap();
        let text = p.describe();
        assert!(text.starts_with("#<Point:0x"));
        assert!(text.ends_with(" x=1, y=2>"));
        assert_eq!(p.to_string(), text);
    }
}

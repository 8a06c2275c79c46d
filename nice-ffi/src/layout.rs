//! # Struct Layouts
//!
//! A [`StructType`] is the static descriptor of a foreign struct: the ordered
//! member list, each member's offset, the total size, and the accessor policy
//! (hidden / read-only). All of it is resolved once, in
//! [`StructBuilder::build`]. After that the descriptor is immutable and shared
//! through `Arc`.
//!
//! # Example
//!
//! ```rust
//! use nice_ffi::{FfiType, StructType};
//!
//! let rect = StructType::builder("Rect")
//!     .layout([
//!         ("x", FfiType::I16),
//!         ("y", FfiType::I16),
//!         ("w", FfiType::U16),
//!         ("h", FfiType::U16),
//!     ])
//!     .read_only(["w", "h"])
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(rect.size(), 8);
//! assert!(rect.is_read_only("w"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::Arc;

use crate::autorelease::{AutoRelease, Release};
use crate::error::{FfiError, FfiResult};
use crate::typed::{ForeignType, TypedPointer};
use crate::types::FfiType;

/// Declared type of a struct member.
#[derive(Clone)]
pub enum FieldType {
    /// A primitive C value.
    Primitive(FfiType),
    /// A struct embedded by value.
    Struct(Arc<StructType>),
    /// A pointer materialized as an instance of the target type.
    Typed(TypedPointer),
    /// A pointer to another instance of the struct being declared.
    SelfPointer,
}

impl FieldType {
    /// Get the size of the member in bytes.
    pub fn size(&self) -> usize {
        match self {
            FieldType::Primitive(t) => t.size(),
            FieldType::Struct(s) => s.size(),
            FieldType::Typed(_) | FieldType::SelfPointer => mem::size_of::<usize>(),
        }
    }

    /// Get the alignment of the member.
    pub fn alignment(&self) -> usize {
        match self {
            FieldType::Primitive(t) => t.alignment(),
            FieldType::Struct(s) => s.alignment(),
            FieldType::Typed(_) | FieldType::SelfPointer => mem::align_of::<usize>(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Primitive(t) => write!(f, "{}", t),
            FieldType::Struct(s) => write!(f, "struct {}", s.name()),
            FieldType::Typed(tp) => write!(f, "*{}", tp.type_name()),
            FieldType::SelfPointer => f.write_str("*Self"),
        }
    }
}

impl fmt::Debug for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldType({})", self)
    }
}

impl From<FfiType> for FieldType {
    fn from(t: FfiType) -> Self {
        FieldType::Primitive(t)
    }
}

impl From<TypedPointer> for FieldType {
    fn from(tp: TypedPointer) -> Self {
        FieldType::Typed(tp)
    }
}

impl From<Arc<StructType>> for FieldType {
    fn from(s: Arc<StructType>) -> Self {
        FieldType::Struct(s)
    }
}

impl From<&Arc<StructType>> for FieldType {
    fn from(s: &Arc<StructType>) -> Self {
        FieldType::Struct(Arc::clone(s))
    }
}

/// One resolved member of a struct layout.
#[derive(Debug, Clone)]
pub struct Member {
    name: String,
    ty: FieldType,
    offset: usize,
    hidden: bool,
    read_only: bool,
}

impl Member {
    /// Member name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    pub fn field_type(&self) -> &FieldType {
        &self.ty
    }

    /// Byte offset from the start of the struct.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.ty.size()
    }

    /// Check if the member has no generated accessors.
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Check if the member has no generated writer.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Check if a reader accessor exists.
    pub fn has_reader(&self) -> bool {
        !self.hidden
    }

    /// Check if a writer accessor exists.
    pub fn has_writer(&self) -> bool {
        !self.hidden && !self.read_only
    }
}

/// Static descriptor of a foreign struct type.
pub struct StructType {
    name: String,
    members: Vec<Member>,
    index: HashMap<String, usize>,
    size: usize,
    alignment: usize,
    pub(crate) autorelease: Arc<AutoRelease>,
}

impl StructType {
    /// Start declaring a struct type.
    pub fn builder(name: impl Into<String>) -> StructBuilder {
        StructBuilder::new(name)
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in declaration order.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Look up a member by name.
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.index.get(name).map(|&i| &self.members[i])
    }

    pub(crate) fn member_index(&self, name: &str) -> FfiResult<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| FfiError::NoSuchMember {
                type_name: self.name.clone(),
                member: name.to_string(),
            })
    }

    /// Total size in bytes, including trailing padding.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment of the struct.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Check if `member` is hidden.
    pub fn is_hidden(&self, member: &str) -> bool {
        self.member(member).map_or(false, Member::is_hidden)
    }

    /// Check if `member` is read-only.
    pub fn is_read_only(&self, member: &str) -> bool {
        self.member(member).map_or(false, Member::is_read_only)
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
        TypedPointer::new(ForeignType::Struct(Arc::clone(self)))
    }

    /// Resolve a reader accessor to its member index.
    pub(crate) fn reader(&self, accessor: &str) -> FfiResult<usize> {
        match self.index.get(accessor) {
            Some(&i) if self.members[i].has_reader() => Ok(i),
            _ => Err(FfiError::UnknownAccessor {
                type_name: self.name.clone(),
                accessor: accessor.to_string(),
            }),
        }
    }

    /// Resolve a writer accessor to its member index.
    pub(crate) fn writer(&self, accessor: &str) -> FfiResult<usize> {
        match self.index.get(accessor) {
            Some(&i) if self.members[i].has_writer() => Ok(i),
            _ => Err(FfiError::UnknownAccessor {
                type_name: self.name.clone(),
                accessor: format!("{}=", accessor),
            }),
        }
    }
}

impl fmt::Debug for StructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructType")
            .field("name", &self.name)
            .field("members", &self.members)
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .finish()
    }
}

/// Builder for [`StructType`].
///
/// `hidden` and `read_only` are cumulative and may be called before or after
/// `layout`. `layout` itself may only be declared once.
pub struct StructBuilder {
    name: String,
    layout: Option<Vec<(String, FieldType)>>,
    redeclared: bool,
    hidden: Vec<String>,
    read_only: Vec<String>,
    release: Option<Arc<dyn Release>>,
}

impl StructBuilder {
    /// Create a builder for a type named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layout: None,
            redeclared: false,
            hidden: Vec::new(),
            read_only: Vec::new(),
            release: None,
        }
    }

    /// Declare the ordered member list.
    pub fn layout<I, S, T>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<FieldType>,
    {
        if self.layout.is_some() {
            self.redeclared = true;
            return self;
        }
        self.layout = Some(
            members
                .into_iter()
                .map(|(name, ty)| (name.into(), ty.into()))
                .collect(),
        );
        self
    }

    /// Mark members as hidden: no reader, no writer, omitted from `describe`.
    pub fn hidden<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden.extend(members.into_iter().map(Into::into));
        self
    }

    /// Mark members as read-only: reader but no writer.
    pub fn read_only<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.read_only.extend(members.into_iter().map(Into::into));
        self
    }

    /// Declare the release capability used for autorelease.
    pub fn release<R: Release + 'static>(mut self, release: R) -> Self {
        self.release = Some(Arc::new(release));
        self
    }

    /// Resolve offsets and accessor policy into an immutable descriptor.
    pub fn build(self) -> FfiResult<Arc<StructType>> {
        if self.redeclared {
            return Err(FfiError::LayoutRedeclared {
                type_name: self.name,
            });
        }

        let declared = self.layout.unwrap_or_default();
        let mut members = Vec::with_capacity(declared.len());
        let mut index = HashMap::with_capacity(declared.len());
        let mut offset = 0;
        let mut alignment = 1;

        for (name, ty) in declared {
            if index.contains_key(&name) {
                return Err(FfiError::DuplicateMember {
                    type_name: self.name,
                    member: name,
                });
            }
            let align = ty.alignment();
            offset = align_up(offset, align);
            alignment = alignment.max(align);

            index.insert(name.clone(), members.len());
            members.push(Member {
                hidden: self.hidden.contains(&name),
                read_only: self.read_only.contains(&name),
                offset,
                name,
                ty,
            });
            offset += members[members.len() - 1].size();
        }

        let autorelease = AutoRelease::new(self.name.clone(), self.release);
        Ok(Arc::new(StructType {
            name: self.name,
            members,
            index,
            size: align_up(offset, alignment),
            alignment,
            autorelease,
        }))
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

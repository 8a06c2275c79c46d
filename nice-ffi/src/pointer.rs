//! # Foreign Handles
//!
//! The handle substrate that struct and opaque wrappers are built on.
//!
//! ## Handle kinds
//!
//! - [`Pointer`]: a plain address owned by native code. The only kind that
//!   autorelease ever tracks.
//! - [`MemoryPointer`]: a zeroed buffer allocated by this crate. It frees itself
//!   when its last clone is dropped, so it is never tracked.
//! - [`AutoPointer`]: a plain address plus a finalizer. The finalizer runs exactly
//!   once, when the last clone is dropped.
//!
//! Wrapping a raw address is safe, but reading or writing through it is only
//! sound if the address really points at memory of the declared layout. That is
//! the same contract the native library documents for its own pointers.

use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::error::{FfiError, FfiResult};

/// A plain foreign address with no memory management attached.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Pointer(usize);

impl Pointer {
    /// Create a pointer from a raw address.
    pub const fn new(address: usize) -> Self {
        Self(address)
    }

    /// The null pointer.
    pub const fn null() -> Self {
        Self(0)
    }

    /// Create a pointer from a raw C pointer.
    pub fn from_raw(ptr: *const c_void) -> Self {
        Self(ptr as usize)
    }

    /// Get the address.
    pub const fn address(&self) -> usize {
        self.0
    }

    /// Check if this is the null pointer.
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Get the address as a C pointer.
    pub fn as_ptr(&self) -> *mut c_void {
        self.0 as *mut c_void
    }

    /// A pointer `offset` bytes past this one.
    pub const fn offset(&self, offset: usize) -> Self {
        Self(self.0.wrapping_add(offset))
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pointer({:#x})", self.0)
    }
}

impl From<*mut c_void> for Pointer {
    fn from(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }
}

/// Backing allocation of a [`MemoryPointer`].
struct Allocation {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.layout.size() > 0 {
            // SAFETY: allocated in `MemoryPointer::zeroed` with this exact layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }
}

// Thread-safe: the allocation is only freed once, by the last Arc owner.
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

/// A zero-initialized buffer owned by this crate.
///
/// Clones and slices share the allocation. It is freed when the last one is
/// dropped.
#[derive(Clone)]
pub struct MemoryPointer {
    alloc: Arc<Allocation>,
    offset: usize,
    len: usize,
}

impl MemoryPointer {
    /// Allocate `size` zeroed bytes aligned to `align`.
    pub fn zeroed(size: usize, align: usize) -> FfiResult<Self> {
        let layout = Layout::from_size_align(size, align.max(1))?;
        let ptr = if size == 0 {
            NonNull::dangling()
        } else {
            // SAFETY: layout has non-zero size.
            let raw = unsafe { alloc::alloc_zeroed(layout) };
            match NonNull::new(raw) {
                Some(ptr) => ptr,
                None => alloc::handle_alloc_error(layout),
            }
        };

        Ok(Self {
            alloc: Arc::new(Allocation { ptr, layout }),
            offset: 0,
            len: size,
        })
    }

    /// Allocate a buffer holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8], align: usize) -> FfiResult<Self> {
        let buffer = Self::zeroed(bytes.len(), align)?;
        // SAFETY: the buffer was just allocated with `bytes.len()` bytes.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.base(), bytes.len());
        }
        Ok(buffer)
    }

    fn base(&self) -> *mut u8 {
        self.alloc.ptr.as_ptr().wrapping_add(self.offset)
    }

    /// Get the address of the first byte.
    pub fn address(&self) -> usize {
        self.base() as usize
    }

    /// Number of bytes addressable through this pointer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A view starting `offset` bytes into this buffer, sharing the allocation.
    pub fn slice(&self, offset: usize) -> Self {
        let offset = offset.min(self.len);
        Self {
            alloc: Arc::clone(&self.alloc),
            offset: self.offset + offset,
            len: self.len - offset,
        }
    }

    /// Check if both point at the same byte of the same allocation.
    pub fn ptr_eq(&self, other: &MemoryPointer) -> bool {
        Arc::ptr_eq(&self.alloc, &other.alloc) && self.offset == other.offset
    }
}

impl fmt::Debug for MemoryPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryPointer({:#x}, {} bytes)", self.address(), self.len)
    }
}

/// Callback run when the last clone of an [`AutoPointer`] is dropped.
pub type Finalizer = Box<dyn FnOnce(Pointer) + Send + Sync>;

struct AutoInner {
    pointer: Pointer,
    finalizer: Option<Finalizer>,
}

impl Drop for AutoInner {
    fn drop(&mut self) {
        let Some(finalizer) = self.finalizer.take() else {
            return;
        };
        let pointer = self.pointer;
        if panic::catch_unwind(AssertUnwindSafe(|| finalizer(pointer))).is_err() {
            tracing::error!(
                address = format_args!("{:#x}", pointer.address()),
                "release callback panicked; foreign memory may have leaked"
            );
        }
    }
}

/// A foreign address whose finalizer runs when it becomes unreachable.
#[derive(Clone)]
pub struct AutoPointer {
    inner: Arc<AutoInner>,
    offset: usize,
}

impl AutoPointer {
    /// Wrap `pointer`, running `finalizer` once the last clone is dropped.
    pub fn new<F>(pointer: Pointer, finalizer: F) -> Self
    where
        F: FnOnce(Pointer) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(AutoInner {
                pointer,
                finalizer: Some(Box::new(finalizer)),
            }),
            offset: 0,
        }
    }

    /// Get the wrapped plain pointer, including any view offset.
    pub fn pointer(&self) -> Pointer {
        self.inner.pointer.offset(self.offset)
    }

    /// Get the address.
    pub fn address(&self) -> usize {
        self.pointer().address()
    }

    /// Number of live clones sharing the finalizer.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Check if both share the same finalizer and offset.
    pub fn ptr_eq(&self, other: &AutoPointer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) && self.offset == other.offset
    }

    fn slice(&self, offset: usize) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            offset: self.offset + offset,
        }
    }
}

impl fmt::Debug for AutoPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AutoPointer({:#x})", self.address())
    }
}

/// Kind of a [`Handle`], used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Plain foreign pointer.
    Raw,
    /// Pointer with an attached finalizer.
    Auto,
    /// Self-managed buffer.
    Memory,
}

/// Backing handle of a struct or opaque value.
#[derive(Clone)]
pub enum Handle {
    /// Plain foreign pointer.
    Raw(Pointer),
    /// Pointer with an attached finalizer.
    Auto(AutoPointer),
    /// Self-managed buffer.
    Memory(MemoryPointer),
}

impl Handle {
    /// Get the address.
    pub fn address(&self) -> usize {
        match self {
            Handle::Raw(p) => p.address(),
            Handle::Auto(p) => p.address(),
            Handle::Memory(p) => p.address(),
        }
    }

    /// Get the address as a plain pointer.
    pub fn pointer(&self) -> Pointer {
        Pointer::new(self.address())
    }

    /// Check if the handle is null.
    pub fn is_null(&self) -> bool {
        self.address() == 0
    }

    /// Get the handle kind.
    pub fn kind(&self) -> HandleKind {
        match self {
            Handle::Raw(_) => HandleKind::Raw,
            Handle::Auto(_) => HandleKind::Auto,
            Handle::Memory(_) => HandleKind::Memory,
        }
    }

    /// Check if this is a plain pointer with no management semantics.
    pub fn is_plain(&self) -> bool {
        matches!(self, Handle::Raw(_))
    }

    /// Check if both handles are the same handle object.
    ///
    /// Raw pointers are compared by address. Managed handles must share their
    /// finalizer or allocation.
    pub fn same_as(&self, other: &Handle) -> bool {
        match (self, other) {
            (Handle::Raw(a), Handle::Raw(b)) => a == b,
            (Handle::Auto(a), Handle::Auto(b)) => a.ptr_eq(b),
            (Handle::Memory(a), Handle::Memory(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// A handle `offset` bytes into this one. Managed handles keep their
    /// backing memory alive through the view.
    pub fn offset(&self, offset: usize) -> Handle {
        match self {
            Handle::Raw(p) if p.is_null() => Handle::Raw(*p),
            Handle::Raw(p) => Handle::Raw(p.offset(offset)),
            Handle::Auto(p) => Handle::Auto(p.slice(offset)),
            Handle::Memory(p) => Handle::Memory(p.slice(offset)),
        }
    }

    fn checked(&self, offset: usize, size: usize) -> FfiResult<*mut u8> {
        if self.is_null() {
            return Err(FfiError::NullPointer);
        }
        if let Handle::Memory(buffer) = self {
            if offset.checked_add(size).map_or(true, |end| end > buffer.len()) {
                return Err(FfiError::OutOfBounds {
                    offset,
                    size,
                    len: buffer.len(),
                });
            }
        }
        Ok(self.address().wrapping_add(offset) as *mut u8)
    }

    /// Copy `size` bytes starting at `offset` out of the backing memory.
    pub fn read_bytes(&self, offset: usize, size: usize) -> FfiResult<Vec<u8>> {
        let src = self.checked(offset, size)?;
        let mut out = vec![0u8; size];
        // SAFETY: bounds checked for buffers; raw addresses are trusted per the
        // module contract.
        unsafe { ptr::copy_nonoverlapping(src as *const u8, out.as_mut_ptr(), size) };
        Ok(out)
    }

    /// Copy `bytes` into the backing memory starting at `offset`.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> FfiResult<()> {
        let dst = self.checked(offset, bytes.len())?;
        // SAFETY: see `read_bytes`.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
        Ok(())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Raw(p) => p.fmt(f),
            Handle::Auto(p) => p.fmt(f),
            Handle::Memory(p) => p.fmt(f),
        }
    }
}

impl From<Pointer> for Handle {
    fn from(p: Pointer) -> Self {
        Handle::Raw(p)
    }
}

impl From<AutoPointer> for Handle {
    fn from(p: AutoPointer) -> Self {
        Handle::Auto(p)
    }
}

impl From<MemoryPointer> for Handle {
    fn from(p: MemoryPointer) -> Self {
        Handle::Memory(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_pointer_basics() {
        assert!(Pointer::null().is_null());
        assert_eq!(Pointer::new(0x10).offset(4).address(), 0x14);
        assert_eq!(format!("{:?}", Pointer::new(255)), "Pointer(0xff)");
    }

    #[test]
    fn test_memory_pointer_zeroed_and_bounds() {
        let buffer = MemoryPointer::zeroed(8, 4).unwrap();
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.address() % 4, 0);

        let handle = Handle::from(buffer);
        assert_eq!(handle.read_bytes(0, 8).unwrap(), vec![0; 8]);
        handle.write_bytes(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(handle.read_bytes(4, 4).unwrap(), vec![1, 2, 3, 4]);

        let err = handle.read_bytes(6, 4).unwrap_err();
        assert!(matches!(err, FfiError::OutOfBounds { offset: 6, size: 4, len: 8 }));
    }

    #[test]
    fn test_memory_slice_shares_allocation() {
        let buffer = MemoryPointer::from_bytes(&[9, 8, 7, 6], 1).unwrap();
        let tail = Handle::from(buffer.clone()).offset(2);
        assert_eq!(tail.read_bytes(0, 2).unwrap(), vec![7, 6]);
        assert_eq!(tail.address(), buffer.address() + 2);
        drop(buffer);
        assert_eq!(tail.read_bytes(0, 2).unwrap(), vec![7, 6]);
    }

    #[test]
    fn test_zero_sized_buffer() {
        let buffer = MemoryPointer::zeroed(0, 8).unwrap();
        assert!(buffer.is_empty());
        assert!(Handle::from(buffer).read_bytes(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_auto_pointer_finalizes_once_on_last_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let auto = AutoPointer::new(Pointer::new(0x40), move |p| {
            assert_eq!(p.address(), 0x40);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let clone = auto.clone();
        let view = Handle::from(auto.clone()).offset(8);
        assert_eq!(view.address(), 0x48);
        assert_eq!(auto.strong_count(), 3);

        drop(auto);
        drop(view);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(clone);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_finalizer_is_contained() {
        let auto = AutoPointer::new(Pointer::new(0x50), |_| panic!("release failed"));
        drop(auto);
    }

    #[test]
    fn test_null_access_is_reported() {
        let handle = Handle::from(Pointer::null());
        assert!(matches!(handle.read_bytes(0, 1), Err(FfiError::NullPointer)));
        assert!(handle.offset(16).is_null());
    }

    #[test]
    fn test_same_as() {
        let raw = Handle::from(Pointer::new(1));
        assert!(raw.same_as(&Handle::from(Pointer::new(1))));
        let buffer = MemoryPointer::zeroed(4, 4).unwrap();
        let a = Handle::from(buffer.clone());
        assert!(a.same_as(&Handle::from(buffer)));
        assert!(!a.same_as(&Handle::from(MemoryPointer::zeroed(4, 4).unwrap())));
        assert_eq!(a.kind(), HandleKind::Memory);
        assert!(!a.is_plain());
    }
}

//! # Automatic Release
//!
//! Per-type policy for freeing foreign memory when the last wrapper referring
//! to an address goes away.
//!
//! Several wrappers may refer to the same native address, for example when a
//! library hands out the same pointer twice. Each wrap of a plain pointer adds
//! one reference in the type's [`RefCountTable`]. Each finalized
//! [`AutoPointer`] removes one. The type's [`Release`] capability runs exactly
//! when the count drops from 1 to 0, and never more than once per address.

use std::fmt;
use std::sync::Arc;

use crate::pointer::{AutoPointer, Handle, Pointer};
use crate::refcount::RefCountTable;

/// Capability to free a foreign object, usually by calling the library's
/// own destructor.
///
/// The release runs while the type's reference count lock is held, so it must
/// not construct or drop wrappers of the same type.
pub trait Release: Send + Sync {
    /// Free the memory at `pointer`.
    fn release(&self, pointer: Pointer);
}

impl<F> Release for F
where
    F: Fn(Pointer) + Send + Sync,
{
    fn release(&self, pointer: Pointer) {
        self(pointer)
    }
}

/// Options applied when binding a handle to a new wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapOptions {
    /// Track plain pointers for automatic release.
    pub autorelease: bool,
}

impl WrapOptions {
    /// Options with autorelease turned off.
    pub fn manual() -> Self {
        Self { autorelease: false }
    }
}

impl Default for WrapOptions {
    /// Uses the configured default (`NICE_FFI_AUTORELEASE`, on unless set).
    fn default() -> Self {
        Self {
            autorelease: crate::config::config().autorelease,
        }
    }
}

/// Autorelease policy owned by one struct or opaque type.
pub struct AutoRelease {
    type_name: String,
    release: Option<Arc<dyn Release>>,
    refcounts: RefCountTable,
}

impl AutoRelease {
    /// Create the policy for `type_name`. Without a release capability the
    /// policy never tracks anything.
    pub fn new(type_name: impl Into<String>, release: Option<Arc<dyn Release>>) -> Arc<Self> {
        Arc::new(Self {
            type_name: type_name.into(),
            release,
            refcounts: RefCountTable::new(),
        })
    }

    /// Check if the type declared a release capability.
    pub fn can_release(&self) -> bool {
        self.release.is_some()
    }

    /// The reference count table for this type.
    pub fn refcounts(&self) -> &RefCountTable {
        &self.refcounts
    }

    /// Wrap a plain, non-null pointer in an [`AutoPointer`] that releases it
    /// through this policy.
    ///
    /// Every other handle is returned unchanged: already managed handles,
    /// self-managed buffers, null pointers, any handle when `enabled` is false,
    /// and any handle when the type has no release capability.
    pub fn make_autoreleasing(self: &Arc<Self>, handle: Handle, enabled: bool) -> Handle {
        let pointer = match handle {
            Handle::Raw(pointer) if enabled && !pointer.is_null() && self.can_release() => pointer,
            other => return other,
        };

        self.refcounts.increment(pointer.address());
        tracing::trace!(
            type_name = %self.type_name,
            address = format_args!("{:#x}", pointer.address()),
            refs = self.refcounts.count(pointer.address()),
            "tracking foreign pointer"
        );

        let policy = Arc::clone(self);
        Handle::Auto(AutoPointer::new(pointer, move |p| {
            policy.release_if_unreferenced(p);
        }))
    }

    /// Drop one reference to `pointer`'s address and release it if that was
    /// the last one.
    ///
    /// Returns `true` if the release capability ran.
    pub fn release_if_unreferenced(&self, pointer: Pointer) -> bool {
        self.refcounts.release_if_unreferenced(pointer.address(), || {
            if let Some(release) = &self.release {
                tracing::debug!(
                    type_name = %self.type_name,
                    address = format_args!("{:#x}", pointer.address()),
                    "releasing foreign pointer"
                );
                release.release(pointer);
            }
        })
    }
}

impl fmt::Debug for AutoRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoRelease")
            .field("type_name", &self.type_name)
            .field("can_release", &self.can_release())
            .field("refcounts", &self.refcounts)
            .finish()
    }
}

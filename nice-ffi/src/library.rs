//! # Library Loading
//!
//! Finds and opens native libraries through a [`PathSet`], and attaches
//! functions whose pointer return values should come back as typed instances.
//!
//! ```rust,ignore
//! use nice_ffi::{Library, OpaqueType};
//! use std::ffi::c_void;
//!
//! let lib = unsafe { Library::load_default(&["SDL"]) }?;
//! let surface = OpaqueType::new("Surface");
//!
//! type CreateSurface = unsafe extern "C" fn(u32, i32, i32) -> *mut c_void;
//! let create = unsafe { lib.attach_typed::<CreateSurface>("SDL_CreateRGBSurface", surface.typed_pointer()) }?;
//! let value = create.call(|f| unsafe { f(0, 640, 480) })?;
//! ```

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use libloading::Symbol;
use parking_lot::RwLock;

use crate::config::config;
use crate::error::{FfiError, FfiResult};
use crate::paths::PathSet;
use crate::pointer::Pointer;
use crate::typed::TypedPointer;
use crate::types::Value;

/// Handle to a loaded native library.
pub struct Library {
    /// The path or name the library was opened with.
    name: String,
    library: libloading::Library,
}

impl Library {
    /// Open a library by path, or by plain name through the system loader.
    ///
    /// # Safety
    ///
    /// Loading a library can execute initialization code. The caller must
    /// ensure the library is trusted.
    pub unsafe fn open(path: impl AsRef<Path>) -> FfiResult<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        match libloading::Library::new(path) {
            Ok(library) => Ok(Self { name, library }),
            Err(e) => Err(FfiError::LoadFailure {
                attempts: vec![format!("{}: {}", name, e)],
                names: name,
            }),
        }
    }

    /// Find and open a library known by any of `names`.
    ///
    /// Files found through `search` are tried first, then each plain name.
    /// The first one that loads wins.
    ///
    /// # Safety
    ///
    /// See [`Library::open`].
    pub unsafe fn load<S: AsRef<str>>(names: &[S], search: &PathSet) -> FfiResult<Self> {
        let found = search.find(names)?;
        let candidates = found
            .iter()
            .map(|p| p.display().to_string())
            .chain(names.iter().map(|n| n.as_ref().to_string()));

        let mut attempts = Vec::new();
        for candidate in candidates {
            tracing::debug!(candidate = %candidate, "trying library");
            match libloading::Library::new(&candidate) {
                Ok(library) => {
                    tracing::info!(library = %candidate, "loaded library");
                    return Ok(Self {
                        name: candidate,
                        library,
                    });
                }
                Err(e) => attempts.push(format!("{}: {}", candidate, e)),
            }
        }

        Err(FfiError::LoadFailure {
            names: pretty_names(names),
            attempts,
        })
    }

    /// [`Library::load`] with [`PathSet::defaults`], after any configured
    /// search directories.
    ///
    /// # Safety
    ///
    /// See [`Library::open`].
    pub unsafe fn load_default<S: AsRef<str>>(names: &[S]) -> FfiResult<Self> {
        let mut search = PathSet::defaults();
        search.prepend_paths(&config().library.search_paths);
        Self::load(names, &search)
    }

    /// The path or name the library was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a symbol.
    ///
    /// # Safety
    ///
    /// `T` must match the symbol's actual type.
    pub unsafe fn symbol<T>(&self, name: &str) -> FfiResult<Symbol<'_, T>> {
        self.library
            .get(name.as_bytes())
            .map_err(|e| FfiError::SymbolNotFound {
                symbol: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Check if a symbol exists.
    pub fn has_symbol(&self, name: &str) -> bool {
        // SAFETY: only the lookup result is inspected; nothing is called.
        unsafe { self.library.get::<*const c_void>(name.as_bytes()).is_ok() }
    }

    /// Attach a function whose pointer return value is wrapped as `returns`.
    ///
    /// # Safety
    ///
    /// `F` must be the function's actual signature, returning a pointer.
    pub unsafe fn attach_typed<F: Copy>(
        self: &Arc<Self>,
        name: &str,
        returns: TypedPointer,
    ) -> FfiResult<TypedFunction<F>> {
        let function = *self.symbol::<F>(name)?;
        Ok(TypedFunction {
            name: name.to_string(),
            function,
            returns,
            _library: Arc::clone(self),
        })
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library").field("name", &self.name).finish()
    }
}

/// A native function returning a pointer to a known type.
///
/// Holds the library open for as long as the function is attached.
pub struct TypedFunction<F> {
    name: String,
    function: F,
    returns: TypedPointer,
    _library: Arc<Library>,
}

impl<F: Copy> TypedFunction<F> {
    /// Symbol name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return type descriptor.
    pub fn returns(&self) -> &TypedPointer {
        &self.returns
    }

    /// The raw function pointer.
    pub fn raw(&self) -> F {
        self.function
    }

    /// Invoke the function through `invoke` and wrap the returned pointer.
    ///
    /// A null return becomes [`Value::Nil`].
    pub fn call(&self, invoke: impl FnOnce(F) -> *mut c_void) -> FfiResult<Value> {
        let returned = invoke(self.function);
        self.returns.wrap(Pointer::from(returned))
    }
}

impl<F> fmt::Debug for TypedFunction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedFunction")
            .field("name", &self.name)
            .field("returns", &self.returns)
            .finish()
    }
}

/// Run `attach`, turning a missing symbol into `Ok(None)`.
///
/// A warning is logged with `warn_message`, or the error text if none is
/// given, unless warnings for missing functions are turned off.
pub fn optional<T>(
    warn_message: Option<&str>,
    attach: impl FnOnce() -> FfiResult<T>,
) -> FfiResult<Option<T>> {
    match attach() {
        Ok(value) => Ok(Some(value)),
        Err(err @ FfiError::SymbolNotFound { .. }) => {
            if config().library.warn_missing {
                match warn_message {
                    Some(message) => tracing::warn!("{}", message),
                    None => tracing::warn!("{}", err),
                }
            }
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// `a`, `a, or b`, `a, b, or c`.
fn pretty_names<S: AsRef<str>>(names: &[S]) -> String {
    match names {
        [] => String::new(),
        [only] => only.as_ref().to_string(),
        [init @ .., last] => {
            let init: Vec<&str> = init.iter().map(AsRef::as_ref).collect();
            format!("{}, or {}", init.join(", "), last.as_ref())
        }
    }
}

/// Registry of loaded libraries, keyed by the name they were opened with.
pub struct LibraryRegistry {
    libraries: RwLock<HashMap<String, Arc<Library>>>,
}

impl LibraryRegistry {
    /// Create a new library registry.
    pub fn new() -> Self {
        Self {
            libraries: RwLock::new(HashMap::new()),
        }
    }

    /// Open a library into the registry, reusing an already loaded one.
    ///
    /// # Safety
    ///
    /// See [`Library::open`].
    pub unsafe fn open(&self, path: impl AsRef<Path>) -> FfiResult<Arc<Library>> {
        let path = path.as_ref();
        let key = path.display().to_string();

        if let Some(lib) = self.libraries.read().get(&key) {
            return Ok(Arc::clone(lib));
        }

        let lib = Arc::new(Library::open(path)?);
        Ok(self.insert_arc(key, lib))
    }

    /// Find and load a library into the registry.
    ///
    /// # Safety
    ///
    /// See [`Library::open`].
    pub unsafe fn load<S: AsRef<str>>(&self, names: &[S], search: &PathSet) -> FfiResult<Arc<Library>> {
        if let Some(lib) = names.iter().find_map(|n| self.get(n.as_ref())) {
            return Ok(lib);
        }
        let lib = Library::load(names, search)?;
        Ok(self.insert(lib))
    }

    /// Store an already opened library.
    pub fn insert(&self, library: Library) -> Arc<Library> {
        let key = library.name().to_string();
        self.insert_arc(key, Arc::new(library))
    }

    fn insert_arc(&self, key: String, library: Arc<Library>) -> Arc<Library> {
        let mut libs = self.libraries.write();
        Arc::clone(libs.entry(key).or_insert(library))
    }

    /// Get a loaded library.
    pub fn get(&self, name: &str) -> Option<Arc<Library>> {
        self.libraries.read().get(name).cloned()
    }

    /// Check if a library is loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.libraries.read().contains_key(name)
    }

    /// Drop the registry's reference to a library.
    pub fn unload(&self, name: &str) -> bool {
        self.libraries.write().remove(name).is_some()
    }

    /// Get the number of loaded libraries.
    pub fn count(&self) -> usize {
        self.libraries.read().len()
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LibraryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryRegistry")
            .field("count", &self.count())
            .finish()
    }
}

static REGISTRY: OnceLock<LibraryRegistry> = OnceLock::new();

/// Get the process-wide library registry.
pub fn registry() -> &'static LibraryRegistry {
    REGISTRY.get_or_init(LibraryRegistry::new)
}

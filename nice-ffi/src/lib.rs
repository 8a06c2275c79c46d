//! # Nice FFI
//!
//! A convenience layer over raw foreign-function bindings. It provides:
//!
//! - **Autorelease**: foreign memory freed by the owning type's release
//!   function once the last wrapper referring to its address is dropped
//! - **Structs**: fixed-layout aggregates with generated accessors, hidden and
//!   read-only members, and construction from maps, value lists, bytes,
//!   copies, or native handles
//! - **Opaque types**: handles with a name and a release policy but no members
//! - **Typed pointers**: pointer members and function returns that come back as
//!   instances of a known type
//! - **Library discovery**: OS-keyed search paths and library loading
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  StructValue (structs.rs)      OpaqueValue (opaque.rs)   │
//! │        │   TypedPointer (typed.rs)    │                  │
//! │        └──────────────┬───────────────┘                  │
//! │               AutoRelease (autorelease.rs)               │
//! │                       │                                  │
//! │     RefCountTable (refcount.rs)    Handle (pointer.rs)   │
//! ├──────────────────────────────────────────────────────────┤
//! │   Library (library.rs)  ──  PathSet (paths.rs)           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use nice_ffi::{FfiType, StructType, Value};
//!
//! let point = StructType::builder("Point")
//!     .layout([("x", FfiType::I32), ("y", FfiType::I32)])
//!     .build()
//!     .unwrap();
//!
//! let p = point.construct(vec![Value::I32(1), Value::I32(2)]).unwrap();
//! p.write("x", 10i32).unwrap();
//! assert_eq!(p.read("x").unwrap(), Value::I32(10));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod autorelease;
pub mod config;
pub mod error;
pub mod layout;
pub mod library;
pub mod log;
pub mod opaque;
pub mod paths;
pub mod pointer;
pub mod refcount;
pub mod structs;
pub mod typed;
pub mod types;

// Re-exports
pub use autorelease::{AutoRelease, Release, WrapOptions};
pub use config::{config, Config, ConfigBuilder, ConfigError, LogLevel};
pub use error::{FfiError, FfiResult};
pub use layout::{FieldType, Member, StructBuilder, StructType};
pub use library::{optional, registry, Library, LibraryRegistry, TypedFunction};
pub use opaque::{OpaqueSource, OpaqueType, OpaqueValue};
pub use paths::{Part, PathSet};
pub use pointer::{AutoPointer, Handle, HandleKind, MemoryPointer, Pointer};
pub use refcount::RefCountTable;
pub use structs::{StructSource, StructValue};
pub use typed::{ForeignType, TypedPointer};
pub use types::{FfiType, Value};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Load configuration from the environment and install logging.
///
/// See [`Config::from_env`] for the supported variables.
pub fn init() -> &'static Config {
    let config = config::config();
    log::init(&config.log);
    config
}

/// Install `config` as the process-wide configuration and set up logging.
///
/// If a configuration is already in place it is kept, and the one in effect
/// is returned.
pub fn init_with_config(config: Config) -> Result<&'static Config, ConfigError> {
    config.validate()?;
    if !config::set_config(config) {
        tracing::debug!("configuration already initialized; keeping existing one");
    }
    let active = config::config();
    log::init(&active.log);
    Ok(active)
}

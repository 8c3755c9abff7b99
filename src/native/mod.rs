//! The native side of the bridge: discovery, loading and the bound entry points.
//!
//! This module defines the seam between the host bridge ([`crate::Runtime`]) and the native
//! hosting library. The bridge never talks to `libcoreclr` directly; it calls through the
//! [`crate::native::NativeHost`] trait, a resolved-symbol table exposing the four fixed entry
//! points:
//!
//! | Entry point | Inputs | Output |
//! |---|---|---|
//! | initialize | exe path, friendly name, property count, joined keys, joined values, assembly path, files path | status |
//! | execute-assembly | assembly path | status |
//! | create-delegate | assembly name, type name, method name | function pointer or status |
//! | shutdown | - | status |
//!
//! A status of zero or above is success, [`crate::native::STATUS_FAILURE`] is failure.
//!
//! # Key Components
//!
//! - [`crate::native::Locator`] - Finds the runtime's files directory
//! - [`crate::native::CoreClr`] - `libloading` based binding of the real hosting library
//! - [`crate::native::HostLoader`] - Factory that turns a files directory into a bound host
//!
//! Tests substitute their own [`crate::native::NativeHost`] and [`crate::native::HostLoader`]
//! implementations, so the lifecycle can be exercised without a runtime installation.

mod coreclr;
mod locator;

pub use coreclr::{
    trusted_platform_assemblies, CoreClr, CoreClrLoader, CORECLR_LIBRARY, SYMBOL_CREATE_DELEGATE,
    SYMBOL_EXECUTE_ASSEMBLY, SYMBOL_INITIALIZE, SYMBOL_SHUTDOWN,
};
pub use locator::{Locator, DEFAULT_CANDIDATES};

use std::{
    ffi::{c_int, CStr},
    path::Path,
    sync::Arc,
};

use crate::Result;

/// Status reported by an entry point that failed.
pub const STATUS_FAILURE: c_int = -1;

/// Flag passed to a managed delegate on a plain invocation.
pub const DELEGATE_FLAG: c_int = 1;

/// Signature of a delegate handed out by the create-delegate entry point.
pub type DelegateFn = unsafe extern "C" fn(c_int);

/// Returns `true` for a status code signaling success.
pub fn succeeded(status: c_int) -> bool {
    status >= 0
}

/// Borrowed, NUL-terminated arguments of the initialize entry point.
#[derive(Debug, Clone, Copy)]
pub struct InitArgs<'a> {
    /// Path of the host executable
    pub exe_path: &'a CStr,
    /// Friendly name of the application domain
    pub friendly_name: &'a CStr,
    /// Number of entries in `property_keys` and `property_values`
    pub property_count: c_int,
    /// Property keys joined with [`crate::marshal::PROPERTY_DELIMITER`]
    pub property_keys: &'a CStr,
    /// Property values joined with [`crate::marshal::PROPERTY_DELIMITER`], positionally
    /// matching `property_keys`
    pub property_values: &'a CStr,
    /// Absolute path of the managed entry assembly, may be empty
    pub assembly_path: &'a CStr,
    /// Absolute path of the runtime's native files directory
    pub files_path: &'a CStr,
}

/// The bound entry points of a loaded hosting library.
///
/// Implementations are shared between the runtime and the delegates it creates, and may be
/// called from threads the host does not control.
pub trait NativeHost: Send + Sync {
    /// Initializes the runtime engine.
    fn initialize(&self, args: &InitArgs<'_>) -> c_int;

    /// Loads `assembly` and runs its entry point to completion.
    fn execute_assembly(&self, assembly: &CStr) -> c_int;

    /// Resolves a static managed method to a callable function pointer.
    ///
    /// # Errors
    ///
    /// Returns the native status on failure.
    fn create_delegate(
        &self,
        assembly: &CStr,
        type_name: &CStr,
        method: &CStr,
    ) -> std::result::Result<DelegateFn, c_int>;

    /// Shuts the runtime engine down.
    fn shutdown(&self) -> c_int;
}

/// Turns a runtime files directory into a bound [`NativeHost`].
pub trait HostLoader: Send + Sync {
    /// Loads the hosting library found in `files_dir` and binds its entry points.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LibraryLoad`] or [`crate::Error::SymbolResolution`].
    fn load(&self, files_dir: &Path) -> Result<Arc<dyn NativeHost>>;
}

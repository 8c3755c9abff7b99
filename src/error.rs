use std::path::PathBuf;

use thiserror::Error;

use crate::runtime::RuntimeState;

macro_rules! configuration_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Configuration {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Configuration {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every operation that crosses into the native hosting library reports failure through one of
/// these variants. The native layer does not provide structured diagnostics, so the variants
/// that map a native status code carry no further detail than the operation that failed.
///
/// # Error Categories
///
/// ## Discovery and Loading
/// - [`Error::RuntimeLocation`] - No runtime installation could be found
/// - [`Error::LibraryLoad`] - The hosting library could not be loaded into the process
/// - [`Error::SymbolResolution`] - A required entry point is missing from the library
///
/// ## Marshalling
/// - [`Error::Configuration`] - A value cannot be encoded for the native side
///
/// ## Native Entry Points
/// - [`Error::RuntimeInit`] - `initialize` signaled failure
/// - [`Error::AssemblyExecution`] - `execute-assembly` signaled failure
/// - [`Error::DelegateCreation`] - `create-delegate` signaled failure
/// - [`Error::RuntimeShutdown`] - `shutdown` signaled failure
///
/// ## Host Side
/// - [`Error::InvalidState`] - Operation invoked outside of its lifecycle state
/// - [`Error::UnknownCallback`] - No callback registered under the requested identity
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// # Examples
///
/// ```rust,no_run
/// use clrhost::{Error, Runtime, RuntimeParams};
///
/// match Runtime::create(RuntimeParams::default()) {
///     Ok(_runtime) => println!("CoreCLR is up"),
///     Err(Error::RuntimeLocation) => eprintln!("Install the .NET runtime first"),
///     Err(Error::RuntimeInit) => eprintln!("The runtime refused to initialize"),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// No runtime installation was found.
    ///
    /// Returned by the locator when no explicit files directory was configured and none of
    /// the well-known installation directories exists on this machine.
    #[error("No runtime installation found")]
    RuntimeLocation,

    /// The native hosting library could not be loaded.
    ///
    /// Covers a missing file, an architecture mismatch or a missing transitive dependency.
    #[error("Failed to load {path}: {message}")]
    LibraryLoad {
        /// The library that was attempted
        path: PathBuf,
        /// The loader's own description of the failure
        message: String,
    },

    /// A required entry point is not exported by the hosting library.
    #[error("Symbol {symbol} not found in {library}")]
    SymbolResolution {
        /// The name of the missing export
        symbol: &'static str,
        /// The library which was searched
        library: PathBuf,
    },

    /// A configuration value cannot be encoded for the native side.
    ///
    /// Raised for interior NUL bytes and for property keys or values containing the property
    /// delimiter, which the receiving side could not split back unambiguously.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the offending value
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Configuration - {file}:{line}: {message}")]
    Configuration {
        /// The message to be printed for the Configuration error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The native initialize entry point signaled failure.
    ///
    /// The runtime instance is unusable afterwards and must not be initialized again.
    #[error("Runtime initialization failed")]
    RuntimeInit,

    /// The native execute-assembly entry point signaled failure.
    #[error("Failed to execute managed assembly {0}")]
    AssemblyExecution(String),

    /// The native create-delegate entry point signaled failure.
    #[error("Failed to create delegate for {assembly}!{type_name}::{method}")]
    DelegateCreation {
        /// Assembly name that was requested
        assembly: String,
        /// Fully qualified type name that was requested
        type_name: String,
        /// Static method name that was requested
        method: String,
    },

    /// The native shutdown entry point signaled failure.
    #[error("Runtime shutdown failed")]
    RuntimeShutdown,

    /// An operation was invoked outside of the lifecycle state it is valid in.
    ///
    /// Nothing was forwarded to the native layer.
    #[error("Cannot {operation} while the runtime is {state}")]
    InvalidState {
        /// The rejected operation
        operation: &'static str,
        /// The state the runtime was in
        state: RuntimeState,
    },

    /// No callback was registered under this identity.
    #[error("No callback registered with id {0}")]
    UnknownCallback(usize),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}

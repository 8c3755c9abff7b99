// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
// - 'native/coreclr.rs' calls the exports of the dynamically loaded hosting library
// - 'marshal/mod.rs' transfers ownership of string buffers across the boundary
// - 'runtime/delegate.rs' invokes managed function pointers

//! # clrhost
//!
//! Embed the .NET CoreCLR runtime inside a Rust process.
//!
//! `clrhost` locates the runtime's native hosting library, loads it, initializes it with a
//! marshalled configuration and drives its lifecycle: initialize, run managed code, shut down.
//! Managed entry points can be executed or bound as delegates, and managed code can call back
//! into host closures by integer identity.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clrhost::prelude::*;
//!
//! let params = RuntimeParams::default()
//!     .with_managed_assembly_path("/opt/app/App.dll");
//!
//! let mut runtime = Runtime::create(params)?;
//! runtime.execute_managed_assembly("/opt/app/App.dll")?;
//! runtime.shutdown()?;
//! # Ok::<(), clrhost::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`native::Locator`] - Finds the runtime's files directory among well-known install paths
//! - [`marshal`] - Encodes the configuration into NUL-terminated native buffers and releases
//!   them exactly once
//! - [`native::CoreClr`] - Loads `libcoreclr` and binds its four entry points
//! - [`Runtime`] - The `Uninitialized → Initialized → Terminated` state machine
//! - [`callback`] - Append-only registry of host closures addressed by identity
//!
//! ## Calling Back Into the Host
//!
//! ```rust,no_run
//! use clrhost::prelude::*;
//!
//! let runtime = Runtime::create(RuntimeParams::default())?;
//! let id = register_callback(|| println!("called from managed code"));
//!
//! // `App.Bridge.Start(int id)` calls `clrhost_invoke_callback(id)` through P/Invoke.
//! let start = runtime.create_delegate("App", "App.Bridge", "Start")?;
//! start.call_with(id)?;
//! # Ok::<(), clrhost::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). The native layer reports only success
//! or failure, so the native-facing variants carry no further diagnostics:
//!
//! ```rust,no_run
//! use clrhost::{Error, Runtime, RuntimeParams};
//!
//! match Runtime::create(RuntimeParams::default()) {
//!     Ok(_) => println!("Runtime is up"),
//!     Err(Error::RuntimeLocation) => println!("No .NET installation found"),
//!     Err(Error::LibraryLoad { path, message }) => println!("{}: {}", path.display(), message),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`](https://docs.rs/log) facade; install any logger in the
//! embedding application to see them.
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and functions.
///
/// # Example
///
/// ```rust,no_run
/// use clrhost::prelude::*;
///
/// let runtime = Runtime::create(RuntimeParams::default())?;
/// assert_eq!(runtime.state(), RuntimeState::Initialized);
/// # Ok::<(), clrhost::Error>(())
/// ```
pub mod prelude;

/// Host closures addressable from managed code by integer identity.
pub mod callback;

/// Configuration marshalling into native buffers.
pub mod marshal;

/// Discovery, loading and binding of the native hosting library.
pub mod native;

/// The host bridge and its lifecycle.
pub mod runtime;

/// `clrhost` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `clrhost` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// The embedded runtime.
///
/// See [`runtime::Runtime`] for the lifecycle.
pub use runtime::{
    ManagedDelegate, Runtime, RuntimeBuilder, RuntimeParams, RuntimeState, SelfLocation,
};

/// Process-wide callback registration.
pub use callback::{clrhost_invoke_callback, invoke_callback, register_callback, CallbackId};

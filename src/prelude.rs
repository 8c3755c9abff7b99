//! # clrhost Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and functions
//! from the clrhost library. Import this module to get quick access to everything needed to
//! embed and drive a runtime.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all clrhost operations
pub use crate::Error;

/// The result type used throughout clrhost
pub use crate::Result;

// ================================================================================================
// Host Bridge
// ================================================================================================

/// The embedded runtime, its lifecycle state and configuration
pub use crate::runtime::{
    ManagedDelegate, Runtime, RuntimeBuilder, RuntimeParams, RuntimeState, SelfLocation,
    APP_PATHS, DEFAULT_APP_DOMAIN_FRIENDLY_NAME, NATIVE_DLL_SEARCH_DIRECTORIES,
};

// ================================================================================================
// Native Layer
// ================================================================================================

/// Discovery and binding of the hosting library
pub use crate::native::{CoreClr, CoreClrLoader, HostLoader, Locator, NativeHost};

/// Native buffer ownership
pub use crate::marshal::{HeapAllocator, NativeAllocator, NativeString};

// ================================================================================================
// Callbacks
// ================================================================================================

/// Host closures addressable from managed code
pub use crate::callback::{
    invoke_callback, register_callback, CallbackId, CallbackRegistry,
};

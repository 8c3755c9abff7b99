//! Marshalling of host-side configuration into native, NUL-terminated buffers.
//!
//! Everything handed to the hosting library travels as a NUL-terminated string owned by a
//! [`crate::marshal::NativeString`]. The owner releases its buffer exactly once when it is
//! dropped, through the same [`crate::marshal::NativeAllocator`] that produced it, so every
//! exit path of a caller (including early returns on error) leaves no outstanding allocation
//! behind and no buffer is ever released twice.
//!
//! # Property Encoding
//!
//! The native initialize entry point receives the property map flattened into two strings,
//! keys and values each joined with [`crate::marshal::PROPERTY_DELIMITER`]. The native side
//! pairs them by position, so the entry order is derived once and reused for both strings.
//! A key or value that itself contains the delimiter cannot be split back unambiguously and is
//! rejected with [`crate::Error::Configuration`].
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use clrhost::marshal::{HeapAllocator, MarshalledConfig, NativeAllocator};
//! use clrhost::RuntimeParams;
//!
//! let params = RuntimeParams::default()
//!     .with_exe_path("/opt/app/host")
//!     .with_property("APP_PATHS", "/opt/app");
//! let allocator: Arc<dyn NativeAllocator> = Arc::new(HeapAllocator);
//!
//! let config = MarshalledConfig::new(&params, "/usr/share/dotnet".as_ref(), &allocator)?;
//! assert_eq!(config.property_count(), 1);
//! assert_eq!(config.args().property_keys.to_str().unwrap(), "APP_PATHS");
//! # Ok::<(), clrhost::Error>(())
//! ```

use std::{
    ffi::{c_char, c_int, CStr, CString},
    fmt,
    path::Path,
    ptr::NonNull,
    sync::Arc,
};

use crate::{native::InitArgs, runtime::RuntimeParams, Result};

/// Separator between entries of the joined property keys and values.
pub const PROPERTY_DELIMITER: char = ';';

/// Source and sink of the native string buffers produced by marshalling.
///
/// Implementations hand out pointers that stay valid until they are passed back to
/// [`NativeAllocator::release`].
pub trait NativeAllocator: Send + Sync {
    /// Moves `value` into a native buffer and returns a pointer to its first byte.
    fn allocate(&self, value: CString) -> NonNull<c_char>;

    /// Releases a buffer previously returned by [`NativeAllocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must have been produced by `allocate` on this allocator and must not be used or
    /// released again afterwards.
    unsafe fn release(&self, ptr: NonNull<c_char>);
}

/// Allocator backed by the process heap through [`CString`] ownership transfer.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl NativeAllocator for HeapAllocator {
    fn allocate(&self, value: CString) -> NonNull<c_char> {
        // CString::into_raw never yields null
        unsafe { NonNull::new_unchecked(value.into_raw()) }
    }

    unsafe fn release(&self, ptr: NonNull<c_char>) {
        drop(CString::from_raw(ptr.as_ptr()));
    }
}

/// An owned, NUL-terminated native buffer.
///
/// The buffer is released through its allocator when the value is dropped.
pub struct NativeString {
    ptr: NonNull<c_char>,
    allocator: Arc<dyn NativeAllocator>,
}

// The buffer is uniquely owned and never mutated after allocation.
unsafe impl Send for NativeString {}
unsafe impl Sync for NativeString {}

impl NativeString {
    /// Copies `value` into a new native buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if `value` contains a NUL byte.
    pub fn new(value: &str, allocator: &Arc<dyn NativeAllocator>) -> Result<NativeString> {
        let value = CString::new(value).map_err(|error| {
            configuration_error!(
                "{:?} contains a NUL byte at position {}",
                value,
                error.nul_position()
            )
        })?;

        Ok(NativeString {
            ptr: allocator.allocate(value),
            allocator: Arc::clone(allocator),
        })
    }

    /// Copies a filesystem path into a new native buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if the path is not valid UTF-8 or contains a
    /// NUL byte.
    pub fn from_path(path: &Path, allocator: &Arc<dyn NativeAllocator>) -> Result<NativeString> {
        let Some(value) = path.to_str() else {
            return Err(configuration_error!(
                "Path {} is not valid UTF-8",
                path.display()
            ));
        };

        NativeString::new(value, allocator)
    }

    /// Borrows the buffer as a C string.
    pub fn as_c_str(&self) -> &CStr {
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }
    }

    /// Raw pointer to the first byte, valid for the lifetime of `self`.
    pub fn as_ptr(&self) -> *const c_char {
        self.ptr.as_ptr()
    }
}

impl Drop for NativeString {
    fn drop(&mut self) {
        unsafe { self.allocator.release(self.ptr) };
    }
}

impl fmt::Debug for NativeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NativeString").field(&self.as_c_str()).finish()
    }
}

/// The flat representation of [`crate::RuntimeParams`] expected by the initialize entry point.
///
/// Holds six native buffers: executable path, friendly name, joined property keys, joined
/// property values, managed assembly path and runtime files path. All of them are released
/// together when the value is dropped.
#[derive(Debug)]
pub struct MarshalledConfig {
    exe_path: NativeString,
    friendly_name: NativeString,
    property_count: c_int,
    property_keys: NativeString,
    property_values: NativeString,
    assembly_path: NativeString,
    files_path: NativeString,
}

impl MarshalledConfig {
    /// Marshals `params` (already defaulted) together with the resolved files directory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if any value contains a NUL byte, a property key
    /// or value contains [`PROPERTY_DELIMITER`], a path is not valid UTF-8 or the property count
    /// does not fit a C `int`. Buffers allocated before the failure are released.
    pub fn new(
        params: &RuntimeParams,
        files_dir: &Path,
        allocator: &Arc<dyn NativeAllocator>,
    ) -> Result<MarshalledConfig> {
        let (property_count, keys, values) = encode_properties(params)?;

        let config = MarshalledConfig {
            exe_path: NativeString::from_path(&params.exe_path, allocator)?,
            friendly_name: NativeString::new(&params.app_domain_friendly_name, allocator)?,
            property_count,
            property_keys: NativeString::new(&keys, allocator)?,
            property_values: NativeString::new(&values, allocator)?,
            assembly_path: NativeString::from_path(&params.managed_assembly_path, allocator)?,
            files_path: NativeString::from_path(files_dir, allocator)?,
        };

        log::debug!(
            "Marshalled {} runtime properties for {:?}",
            property_count,
            config.friendly_name
        );

        Ok(config)
    }

    /// Number of key/value pairs encoded in the joined strings.
    pub fn property_count(&self) -> c_int {
        self.property_count
    }

    /// Borrowed view handed to [`crate::native::NativeHost::initialize`].
    pub fn args(&self) -> InitArgs<'_> {
        InitArgs {
            exe_path: self.exe_path.as_c_str(),
            friendly_name: self.friendly_name.as_c_str(),
            property_count: self.property_count,
            property_keys: self.property_keys.as_c_str(),
            property_values: self.property_values.as_c_str(),
            assembly_path: self.assembly_path.as_c_str(),
            files_path: self.files_path.as_c_str(),
        }
    }
}

/// Flattens the property map into `(count, joined keys, joined values)`.
///
/// The iteration order is captured once so keys and values line up positionally.
fn encode_properties(params: &RuntimeParams) -> Result<(c_int, String, String)> {
    let entries: Vec<(&str, &str)> = params
        .properties
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();

    for (key, value) in &entries {
        if key.contains(PROPERTY_DELIMITER) {
            return Err(configuration_error!(
                "Property key {:?} contains the delimiter '{}'",
                key,
                PROPERTY_DELIMITER
            ));
        }
        if value.contains(PROPERTY_DELIMITER) {
            return Err(configuration_error!(
                "Value of property {:?} contains the delimiter '{}'",
                key,
                PROPERTY_DELIMITER
            ));
        }
    }

    let count = c_int::try_from(entries.len())
        .map_err(|_| configuration_error!("Too many properties: {}", entries.len()))?;

    let delimiter = PROPERTY_DELIMITER.to_string();
    let keys = entries
        .iter()
        .map(|(key, _)| *key)
        .collect::<Vec<_>>()
        .join(&delimiter);
    let values = entries
        .iter()
        .map(|(_, value)| *value)
        .collect::<Vec<_>>()
        .join(&delimiter);

    Ok((count, keys, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test::CountingAllocator, Error};

    fn params() -> RuntimeParams {
        RuntimeParams::default()
            .with_exe_path("/opt/app/host")
            .with_app_domain_friendly_name("app")
            .with_managed_assembly_path("/opt/app/App.dll")
    }

    #[test]
    fn keys_and_values_stay_paired() {
        let params = params()
            .with_property("A", "1")
            .with_property("B", "2")
            .with_property("C", "3");
        let allocator: Arc<dyn NativeAllocator> = Arc::new(HeapAllocator);

        let config = MarshalledConfig::new(&params, Path::new("/clr"), &allocator).unwrap();
        let args = config.args();
        assert_eq!(args.property_count, 3);

        let keys: Vec<&str> = args.property_keys.to_str().unwrap().split(';').collect();
        let values: Vec<&str> = args.property_values.to_str().unwrap().split(';').collect();
        assert_eq!(keys.len(), 3);
        for (key, value) in keys.iter().zip(values.iter()) {
            assert_eq!(params.properties[*key], *value);
        }
    }

    #[test]
    fn scalar_fields() {
        let allocator: Arc<dyn NativeAllocator> = Arc::new(HeapAllocator);
        let config = MarshalledConfig::new(&params(), Path::new("/clr"), &allocator).unwrap();
        let args = config.args();

        assert_eq!(args.exe_path.to_str().unwrap(), "/opt/app/host");
        assert_eq!(args.friendly_name.to_str().unwrap(), "app");
        assert_eq!(args.assembly_path.to_str().unwrap(), "/opt/app/App.dll");
        assert_eq!(args.files_path.to_str().unwrap(), "/clr");
        assert_eq!(args.property_count, 0);
        assert_eq!(args.property_keys.to_bytes(), b"");
        assert_eq!(args.property_values.to_bytes(), b"");
    }

    #[test]
    fn release_is_paired() {
        let counter = Arc::new(CountingAllocator::default());
        let allocator: Arc<dyn NativeAllocator> = counter.clone();

        let config = MarshalledConfig::new(
            &params().with_property("APP_PATHS", "/opt/app"),
            Path::new("/clr"),
            &allocator,
        )
        .unwrap();
        assert_eq!(counter.allocated(), 6);
        assert_eq!(counter.outstanding(), 6);

        drop(config);
        assert_eq!(counter.released(), 6);
        assert_eq!(counter.outstanding(), 0);
    }

    #[test]
    fn failure_releases_partial_work() {
        let counter = Arc::new(CountingAllocator::default());
        let allocator: Arc<dyn NativeAllocator> = counter.clone();

        let params = params().with_managed_assembly_path("/opt/app/\0App.dll");
        let result = MarshalledConfig::new(&params, Path::new("/clr"), &allocator);

        assert!(matches!(result, Err(Error::Configuration { .. })));
        assert!(counter.allocated() > 0);
        assert_eq!(counter.outstanding(), 0);
    }

    #[test]
    fn delimiter_is_rejected() {
        let allocator: Arc<dyn NativeAllocator> = Arc::new(HeapAllocator);

        let in_value = params().with_property("APP_PATHS", "/a;/b");
        assert!(matches!(
            MarshalledConfig::new(&in_value, Path::new("/clr"), &allocator),
            Err(Error::Configuration { .. })
        ));

        let in_key = params().with_property("A;B", "1");
        assert!(matches!(
            MarshalledConfig::new(&in_key, Path::new("/clr"), &allocator),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn native_string_roundtrip() {
        let counter = Arc::new(CountingAllocator::default());
        let allocator: Arc<dyn NativeAllocator> = counter.clone();

        let value = NativeString::new("System.Private.CoreLib", &allocator).unwrap();
        assert_eq!(value.as_c_str().to_str().unwrap(), "System.Private.CoreLib");
        assert_eq!(value.as_ptr(), value.as_c_str().as_ptr());
        assert_eq!(counter.outstanding(), 1);

        drop(value);
        assert_eq!(counter.outstanding(), 0);

        assert!(NativeString::new("bad\0value", &allocator).is_err());
        assert_eq!(counter.allocated(), 1);
    }
}

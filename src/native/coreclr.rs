//! Binding of the CoreCLR hosting library (`libcoreclr`).
//!
//! [`crate::native::CoreClr`] loads the hosting library from the runtime's files directory with
//! `libloading`, resolves the four `coreclr_*` exports into plain function pointers and
//! implements [`crate::native::NativeHost`] on top of them. It owns the host handle and domain
//! id handed out by `coreclr_initialize` and threads them through every later call.
//!
//! Once bound, the library stays loaded until the process exits. CoreCLR cannot be unloaded or
//! initialized a second time within one process, so the binding refuses a second
//! initialization instead of forwarding it.

use std::{
    collections::HashSet,
    ffi::{c_char, c_int, c_uint, c_void, CStr, CString},
    fs,
    mem::ManuallyDrop,
    path::{Path, PathBuf},
    ptr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use libloading::Library;

use super::{succeeded, DelegateFn, HostLoader, InitArgs, NativeHost, STATUS_FAILURE};
use crate::{marshal::PROPERTY_DELIMITER, Error, Result};

/// File name of the hosting library inside the runtime's files directory.
#[cfg(target_os = "linux")]
pub const CORECLR_LIBRARY: &str = "libcoreclr.so";
/// File name of the hosting library inside the runtime's files directory.
#[cfg(target_os = "macos")]
pub const CORECLR_LIBRARY: &str = "libcoreclr.dylib";
/// File name of the hosting library inside the runtime's files directory.
#[cfg(windows)]
pub const CORECLR_LIBRARY: &str = "coreclr.dll";
/// File name of the hosting library inside the runtime's files directory.
#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
pub const CORECLR_LIBRARY: &str = "libcoreclr.so";

/// Export name of the initialize entry point.
pub const SYMBOL_INITIALIZE: &str = "coreclr_initialize";
/// Export name of the execute-assembly entry point.
pub const SYMBOL_EXECUTE_ASSEMBLY: &str = "coreclr_execute_assembly";
/// Export name of the create-delegate entry point.
pub const SYMBOL_CREATE_DELEGATE: &str = "coreclr_create_delegate";
/// Export name of the shutdown entry point.
pub const SYMBOL_SHUTDOWN: &str = "coreclr_shutdown";

const TPA_KEY: &CStr = c"TRUSTED_PLATFORM_ASSEMBLIES";

/// Assembly file extensions added to the trusted platform assemblies, in priority order.
const TPA_EXTENSIONS: &[&str] = &[".ni.dll", ".dll", ".ni.exe", ".exe"];

#[cfg(windows)]
const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: char = ':';

/// Set once CoreCLR has been asked to initialize in this process.
static ENGINE_CLAIMED: AtomicBool = AtomicBool::new(false);

type InitializeFn = unsafe extern "C" fn(
    exe_path: *const c_char,
    app_domain_friendly_name: *const c_char,
    property_count: c_int,
    property_keys: *const *const c_char,
    property_values: *const *const c_char,
    host_handle: *mut *mut c_void,
    domain_id: *mut c_uint,
) -> c_int;

type ExecuteAssemblyFn = unsafe extern "C" fn(
    host_handle: *mut c_void,
    domain_id: c_uint,
    argc: c_int,
    argv: *const *const c_char,
    managed_assembly_path: *const c_char,
    exit_code: *mut c_uint,
) -> c_int;

type CreateDelegateFn = unsafe extern "C" fn(
    host_handle: *mut c_void,
    domain_id: c_uint,
    assembly_name: *const c_char,
    type_name: *const c_char,
    method_name: *const c_char,
    delegate: *mut *mut c_void,
) -> c_int;

type ShutdownFn = unsafe extern "C" fn(host_handle: *mut c_void, domain_id: c_uint) -> c_int;

/// Resolved `coreclr_*` exports.
#[derive(Clone, Copy)]
pub(crate) struct Symbols {
    initialize: InitializeFn,
    execute_assembly: ExecuteAssemblyFn,
    create_delegate: CreateDelegateFn,
    shutdown: ShutdownFn,
}

/// Host handle and domain id of an initialized engine.
#[derive(Clone, Copy)]
struct Session {
    handle: *mut c_void,
    domain_id: c_uint,
}

// The handle is an opaque token owned by the engine, valid on any thread.
unsafe impl Send for Session {}

/// A loaded CoreCLR hosting library with its entry points bound.
pub struct CoreClr {
    _library: Option<ManuallyDrop<Library>>,
    path: PathBuf,
    symbols: Symbols,
    engine: &'static AtomicBool,
    session: Mutex<Option<Session>>,
}

impl CoreClr {
    /// Loads [`CORECLR_LIBRARY`] from `files_dir` and resolves the four entry points.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LibraryLoad`] if the library cannot be loaded, or
    /// [`crate::Error::SymbolResolution`] naming the first export that is missing.
    pub fn load(files_dir: &Path) -> Result<CoreClr> {
        let path = files_dir.join(CORECLR_LIBRARY);
        log::debug!("Loading {}", path.display());

        let library = unsafe { Library::new(&path) }.map_err(|error| Error::LibraryLoad {
            path: path.clone(),
            message: error.to_string(),
        })?;

        let symbols = unsafe {
            Symbols {
                initialize: resolve(&library, SYMBOL_INITIALIZE, &path)?,
                execute_assembly: resolve(&library, SYMBOL_EXECUTE_ASSEMBLY, &path)?,
                create_delegate: resolve(&library, SYMBOL_CREATE_DELEGATE, &path)?,
                shutdown: resolve(&library, SYMBOL_SHUTDOWN, &path)?,
            }
        };

        Ok(CoreClr {
            _library: Some(ManuallyDrop::new(library)),
            path,
            symbols,
            engine: &ENGINE_CLAIMED,
            session: Mutex::new(None),
        })
    }

    /// Binds already resolved entry points, guarded by `engine` instead of the process-wide
    /// flag.
    #[cfg(test)]
    pub(crate) fn with_symbols(symbols: Symbols, engine: &'static AtomicBool) -> CoreClr {
        CoreClr {
            _library: None,
            path: PathBuf::from("<symbols>"),
            symbols,
            engine,
            session: Mutex::new(None),
        }
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn session(&self) -> Option<Session> {
        *lock!(self.session)
    }
}

/// Looks up `name` and copies the function pointer out of the library.
///
/// # Safety
///
/// `T` must match the signature of the export.
unsafe fn resolve<T: Copy>(library: &Library, name: &'static str, path: &Path) -> Result<T> {
    match library.get::<T>(name.as_bytes()) {
        Ok(symbol) => Ok(*symbol),
        Err(_) => Err(Error::SymbolResolution {
            symbol: name,
            library: path.to_path_buf(),
        }),
    }
}

impl NativeHost for CoreClr {
    fn initialize(&self, args: &InitArgs<'_>) -> c_int {
        let mut session = lock!(self.session);
        if session.is_some() {
            log::error!("CoreCLR from {} is already initialized", self.path.display());
            return STATUS_FAILURE;
        }

        let Some((mut keys, mut values)) = split_properties(args) else {
            log::error!(
                "Property keys and values do not match the property count {}",
                args.property_count
            );
            return STATUS_FAILURE;
        };

        if !keys.iter().any(|key| key.as_c_str() == TPA_KEY) {
            let files_dir = Path::new(args.files_path.to_str().unwrap_or_default());
            let tpa = match trusted_platform_assemblies(files_dir) {
                Ok(tpa) => tpa,
                Err(error) => {
                    log::error!(
                        "Failed to enumerate assemblies in {}: {}",
                        files_dir.display(),
                        error
                    );
                    return STATUS_FAILURE;
                }
            };
            let Ok(tpa) = CString::new(tpa) else {
                return STATUS_FAILURE;
            };
            keys.push(TPA_KEY.to_owned());
            values.push(tpa);
        }

        if args.assembly_path.is_empty() {
            log::debug!("Expecting to run a standard executable");
        } else {
            log::debug!(
                "Expecting to load {:?} and invoke arbitrary methods",
                args.assembly_path
            );
        }

        if self.engine.swap(true, Ordering::SeqCst) {
            log::error!("CoreCLR can only be initialized once per process");
            return STATUS_FAILURE;
        }

        let key_ptrs: Vec<*const c_char> = keys.iter().map(|key| key.as_ptr()).collect();
        let value_ptrs: Vec<*const c_char> = values.iter().map(|value| value.as_ptr()).collect();
        let mut handle: *mut c_void = ptr::null_mut();
        let mut domain_id: c_uint = 0;

        let status = unsafe {
            (self.symbols.initialize)(
                args.exe_path.as_ptr(),
                args.friendly_name.as_ptr(),
                key_ptrs.len() as c_int,
                key_ptrs.as_ptr(),
                value_ptrs.as_ptr(),
                &mut handle,
                &mut domain_id,
            )
        };

        if !succeeded(status) {
            log::error!("{} failed - status: 0x{:08x}", SYMBOL_INITIALIZE, status);
            return STATUS_FAILURE;
        }

        log::debug!("{} ok, domain {}", SYMBOL_INITIALIZE, domain_id);
        *session = Some(Session { handle, domain_id });
        0
    }

    fn execute_assembly(&self, assembly: &CStr) -> c_int {
        let Some(session) = self.session() else {
            log::error!("Cannot execute {:?}, CoreCLR is not initialized", assembly);
            return STATUS_FAILURE;
        };

        let mut exit_code: c_uint = 0;
        let status = unsafe {
            (self.symbols.execute_assembly)(
                session.handle,
                session.domain_id,
                0,
                ptr::null(),
                assembly.as_ptr(),
                &mut exit_code,
            )
        };

        if !succeeded(status) {
            log::error!("{} failed - status: 0x{:08x}", SYMBOL_EXECUTE_ASSEMBLY, status);
            return STATUS_FAILURE;
        }

        log::debug!("{:?} exited with code {}", assembly, exit_code);
        0
    }

    fn create_delegate(
        &self,
        assembly: &CStr,
        type_name: &CStr,
        method: &CStr,
    ) -> std::result::Result<DelegateFn, c_int> {
        let Some(session) = self.session() else {
            log::error!("Cannot create delegate, CoreCLR is not initialized");
            return Err(STATUS_FAILURE);
        };

        let mut delegate: *mut c_void = ptr::null_mut();
        let status = unsafe {
            (self.symbols.create_delegate)(
                session.handle,
                session.domain_id,
                assembly.as_ptr(),
                type_name.as_ptr(),
                method.as_ptr(),
                &mut delegate,
            )
        };

        if !succeeded(status) || delegate.is_null() {
            log::error!("{} failed - status: 0x{:08x}", SYMBOL_CREATE_DELEGATE, status);
            return Err(STATUS_FAILURE);
        }

        Ok(unsafe { std::mem::transmute::<*mut c_void, DelegateFn>(delegate) })
    }

    fn shutdown(&self) -> c_int {
        let Some(session) = lock!(self.session).take() else {
            log::error!("Cannot shut down, CoreCLR is not initialized");
            return STATUS_FAILURE;
        };

        let status = unsafe { (self.symbols.shutdown)(session.handle, session.domain_id) };
        if !succeeded(status) {
            log::error!("{} failed - status: 0x{:08x}", SYMBOL_SHUTDOWN, status);
            return STATUS_FAILURE;
        }

        status
    }
}

/// [`HostLoader`] producing a [`CoreClr`] binding.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreClrLoader;

impl HostLoader for CoreClrLoader {
    fn load(&self, files_dir: &Path) -> Result<Arc<dyn NativeHost>> {
        Ok(Arc::new(CoreClr::load(files_dir)?))
    }
}

/// Splits the joined keys and values back into arrays of `property_count` entries.
fn split_properties(args: &InitArgs<'_>) -> Option<(Vec<CString>, Vec<CString>)> {
    let count = usize::try_from(args.property_count).ok()?;
    let keys = split_joined(args.property_keys, count)?;
    let values = split_joined(args.property_values, count)?;

    Some((keys, values))
}

fn split_joined(joined: &CStr, count: usize) -> Option<Vec<CString>> {
    if count == 0 {
        return joined.is_empty().then(Vec::new);
    }

    let delimiter = PROPERTY_DELIMITER as u8;
    let entries = joined
        .to_bytes()
        .split(|byte| *byte == delimiter)
        .map(|entry| CString::new(entry).ok())
        .collect::<Option<Vec<_>>>()?;

    (entries.len() == count).then_some(entries)
}

/// Builds the trusted platform assemblies list from the assemblies in `dir`.
///
/// Every assembly name is listed once; a native image (`.ni.dll`, `.ni.exe`) is preferred over
/// the IL-only file of the same name. Entries are absolute paths joined with the platform path
/// list separator.
///
/// # Errors
///
/// Returns [`crate::Error::FileError`] if the directory cannot be read.
pub fn trusted_platform_assemblies(dir: &Path) -> Result<String> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let mut seen = HashSet::new();
    let mut assemblies = Vec::new();

    for extension in TPA_EXTENSIONS {
        let native_image = extension.starts_with(".ni.");
        for path in &files {
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(extension) else {
                continue;
            };
            if stem.is_empty() || (!native_image && stem.ends_with(".ni")) {
                continue;
            }
            if let Some(path) = path.to_str() {
                if seen.insert(stem.to_string()) {
                    assemblies.push(path);
                }
            }
        }
    }

    log::trace!(
        "{} trusted platform assemblies in {}",
        assemblies.len(),
        dir.display()
    );

    Ok(assemblies.join(&PATH_LIST_SEPARATOR.to_string()))
}

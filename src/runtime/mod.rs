//! The host bridge: lifecycle of an embedded runtime.
//!
//! A [`crate::Runtime`] moves through three states:
//!
//! ```text
//! Uninitialized --init--> Initialized --shutdown--> Terminated
//! ```
//!
//! `Terminated` is final; a fresh runtime must be built to start over, and CoreCLR itself
//! cannot be initialized twice within one process. Managed code can only be executed and
//! delegates only be created while the runtime is `Initialized`; anywhere else the call fails
//! with [`crate::Error::InvalidState`] before reaching the native layer.
//!
//! # Collaborators
//!
//! The runtime does not hard-wire its surroundings. [`crate::RuntimeBuilder`] injects:
//!
//! - a [`crate::native::Locator`] to find the runtime's files directory
//! - a [`crate::native::HostLoader`] to load and bind the hosting library
//! - a [`crate::marshal::NativeAllocator`] for the marshalled buffers
//! - a [`crate::SelfLocation`] for the host executable's path and directory
//!
//! # Threading
//!
//! Lifecycle calls take `&mut self` and are therefore serialized by the owner. Delegates may be
//! invoked from any thread and observe the lifecycle state the runtime publishes. A delegate
//! call holds that state for reading until it returns, so shutdown never overlaps managed code
//! started through a delegate.
//!
//! # Examples
//!
//! ```rust,no_run
//! use clrhost::{Runtime, RuntimeParams};
//!
//! let params = RuntimeParams::default()
//!     .with_managed_assembly_path("/opt/app/App.dll")
//!     .with_clr_files_path("/usr/share/dotnet/shared/Microsoft.NETCore.App/8.0.0");
//!
//! let mut runtime = Runtime::new(params);
//! runtime.init()?;
//! runtime.execute_managed_assembly("/opt/app/App.dll")?;
//! runtime.shutdown()?;
//! # Ok::<(), clrhost::Error>(())
//! ```

mod delegate;
mod params;

pub use delegate::ManagedDelegate;
pub use params::{
    RuntimeParams, SelfLocation, APP_PATHS, DEFAULT_APP_DOMAIN_FRIENDLY_NAME,
    NATIVE_DLL_SEARCH_DIRECTORIES,
};

use std::{
    fmt,
    path::Path,
    sync::{Arc, RwLock},
};

use strum::Display;

use crate::{
    marshal::{HeapAllocator, MarshalledConfig, NativeAllocator, NativeString},
    native::{succeeded, CoreClrLoader, HostLoader, Locator, NativeHost},
    Error, Result,
};

/// Lifecycle state of a [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RuntimeState {
    /// Constructed, native engine not yet initialized.
    Uninitialized,
    /// Native engine initialized, managed code can run.
    Initialized,
    /// Shut down or failed to initialize. Final.
    Terminated,
}

/// An embedded managed runtime.
///
/// See the [module documentation](crate::runtime) for the lifecycle.
pub struct Runtime {
    params: RuntimeParams,
    locator: Locator,
    loader: Arc<dyn HostLoader>,
    allocator: Arc<dyn NativeAllocator>,
    location: SelfLocation,
    host: Option<Arc<dyn NativeHost>>,
    state: Arc<RwLock<RuntimeState>>,
}

impl Runtime {
    /// Creates an uninitialized runtime using the CoreCLR loader and the default locator.
    pub fn new(params: RuntimeParams) -> Runtime {
        RuntimeBuilder::new(params).build()
    }

    /// Creates a runtime and initializes it right away.
    ///
    /// # Errors
    ///
    /// Returns any error of [`Runtime::init`].
    pub fn create(params: RuntimeParams) -> Result<Runtime> {
        let mut runtime = Runtime::new(params);
        runtime.init()?;
        Ok(runtime)
    }

    /// Starts configuring a runtime with injected collaborators.
    pub fn builder(params: RuntimeParams) -> RuntimeBuilder {
        RuntimeBuilder::new(params)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RuntimeState {
        *read_lock!(self.state)
    }

    /// The parameters, including the defaults filled in by [`Runtime::init`].
    pub fn params(&self) -> &RuntimeParams {
        &self.params
    }

    /// Initializes the native engine.
    ///
    /// Fills in parameter defaults, resolves the runtime's files directory, loads and binds the
    /// hosting library, marshals the configuration and calls the initialize entry point. The
    /// marshalled buffers are released whatever the outcome.
    ///
    /// Failures before the native call leave the runtime `Uninitialized`. A failing native
    /// initialize leaves it `Terminated`; the instance must not be retried.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidState`] if the runtime is not `Uninitialized`
    /// - [`crate::Error::RuntimeLocation`] if no runtime installation is found
    /// - [`crate::Error::LibraryLoad`] / [`crate::Error::SymbolResolution`] from loading
    /// - [`crate::Error::Configuration`] if a parameter cannot be marshalled
    /// - [`crate::Error::RuntimeInit`] if the native engine refused to initialize
    pub fn init(&mut self) -> Result<()> {
        let state = self.state();
        if state != RuntimeState::Uninitialized {
            return Err(Error::InvalidState {
                operation: "initialize",
                state,
            });
        }

        self.params.apply_defaults(&self.location)?;

        let files_dir = self
            .locator
            .locate(Some(self.params.clr_files_path.as_path()))?;
        self.params.clr_files_path = files_dir.clone();

        let host = match self.host.clone() {
            Some(host) => host,
            None => {
                let host = self.loader.load(&files_dir)?;
                self.host = Some(Arc::clone(&host));
                host
            }
        };

        let config = MarshalledConfig::new(&self.params, &files_dir, &self.allocator)?;

        log::info!(
            "Initializing runtime {:?} from {}",
            self.params.app_domain_friendly_name,
            files_dir.display()
        );
        let status = host.initialize(&config.args());
        drop(config);

        if !succeeded(status) {
            *write_lock!(self.state) = RuntimeState::Terminated;
            return Err(Error::RuntimeInit);
        }

        *write_lock!(self.state) = RuntimeState::Initialized;
        log::info!("Runtime initialized");
        Ok(())
    }

    /// Loads `assembly` and runs its entry point to completion.
    ///
    /// The managed exit code is not reported; only whether the native call succeeded.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidState`] if the runtime is not `Initialized`
    /// - [`crate::Error::Configuration`] if the path cannot be marshalled
    /// - [`crate::Error::AssemblyExecution`] if the native call failed
    pub fn execute_managed_assembly(&self, assembly: impl AsRef<Path>) -> Result<()> {
        let assembly = assembly.as_ref();
        let host = self.active_host("execute a managed assembly")?;
        let path = NativeString::from_path(assembly, &self.allocator)?;

        log::info!("Executing {}", assembly.display());
        let status = host.execute_assembly(path.as_c_str());
        drop(path);

        if !succeeded(status) {
            return Err(Error::AssemblyExecution(assembly.display().to_string()));
        }

        Ok(())
    }

    /// Binds the static method `method_name` of `type_name` in `assembly_name`.
    ///
    /// The returned delegate owns the marshalled names for its whole lifetime.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidState`] if the runtime is not `Initialized`
    /// - [`crate::Error::Configuration`] if a name cannot be marshalled
    /// - [`crate::Error::DelegateCreation`] if the native call failed
    pub fn create_delegate(
        &self,
        assembly_name: &str,
        type_name: &str,
        method_name: &str,
    ) -> Result<ManagedDelegate> {
        let host = self.active_host("create a delegate")?;
        let names = [
            NativeString::new(assembly_name, &self.allocator)?,
            NativeString::new(type_name, &self.allocator)?,
            NativeString::new(method_name, &self.allocator)?,
        ];

        log::debug!(
            "Creating delegate for {}!{}::{}",
            assembly_name,
            type_name,
            method_name
        );
        let function = host
            .create_delegate(
                names[0].as_c_str(),
                names[1].as_c_str(),
                names[2].as_c_str(),
            )
            .map_err(|_| Error::DelegateCreation {
                assembly: assembly_name.to_string(),
                type_name: type_name.to_string(),
                method: method_name.to_string(),
            })?;

        Ok(ManagedDelegate::new(
            function,
            names,
            Arc::clone(&self.state),
            host,
        ))
    }

    /// Shuts the native engine down.
    ///
    /// Waits for delegate calls in progress on other threads to return. The runtime is
    /// `Terminated` afterwards even if the native call failed.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidState`] if the runtime is not `Initialized`
    /// - [`crate::Error::RuntimeShutdown`] if the native call failed
    pub fn shutdown(&mut self) -> Result<()> {
        let host = self.active_host("shut down")?;

        // Blocks until in-flight delegate calls have returned.
        let mut state = write_lock!(self.state);

        log::info!("Shutting down runtime");
        let status = host.shutdown();
        *state = RuntimeState::Terminated;
        drop(state);

        if !succeeded(status) {
            return Err(Error::RuntimeShutdown);
        }

        Ok(())
    }

    fn active_host(&self, operation: &'static str) -> Result<Arc<dyn NativeHost>> {
        match (self.state(), &self.host) {
            (RuntimeState::Initialized, Some(host)) => Ok(Arc::clone(host)),
            (state, _) => Err(Error::InvalidState { operation, state }),
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.state() == RuntimeState::Initialized {
            log::warn!(
                "Runtime {:?} dropped without shutdown",
                self.params.app_domain_friendly_name
            );
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("params", &self.params)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Configures the collaborators of a [`Runtime`].
///
/// ```rust
/// use clrhost::{native::Locator, Runtime, RuntimeParams, RuntimeState, SelfLocation};
///
/// let runtime = Runtime::builder(RuntimeParams::default())
///     .locator(Locator::new(["/opt/dotnet/shared/Microsoft.NETCore.App/8.0.0"]))
///     .self_location(SelfLocation::Fixed("/opt/app/host".into()))
///     .build();
/// assert_eq!(runtime.state(), RuntimeState::Uninitialized);
/// ```
pub struct RuntimeBuilder {
    params: RuntimeParams,
    locator: Locator,
    loader: Arc<dyn HostLoader>,
    allocator: Arc<dyn NativeAllocator>,
    location: SelfLocation,
}

impl RuntimeBuilder {
    /// Starts from the production collaborators.
    pub fn new(params: RuntimeParams) -> Self {
        RuntimeBuilder {
            params,
            locator: Locator::default(),
            loader: Arc::new(CoreClrLoader),
            allocator: Arc::new(HeapAllocator),
            location: SelfLocation::Current,
        }
    }

    /// Replaces the installation directory candidates.
    pub fn locator(mut self, locator: Locator) -> Self {
        self.locator = locator;
        self
    }

    /// Replaces the hosting library loader.
    pub fn loader(mut self, loader: Arc<dyn HostLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Replaces the allocator for marshalled buffers.
    pub fn allocator(mut self, allocator: Arc<dyn NativeAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Replaces how the host executable is located.
    pub fn self_location(mut self, location: SelfLocation) -> Self {
        self.location = location;
        self
    }

    /// Builds the uninitialized runtime.
    pub fn build(self) -> Runtime {
        Runtime {
            params: self.params,
            locator: self.locator,
            loader: self.loader,
            allocator: self.allocator,
            location: self.location,
            host: None,
            state: Arc::new(RwLock::new(RuntimeState::Uninitialized)),
        }
    }
}

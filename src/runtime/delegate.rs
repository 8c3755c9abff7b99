//! Callable handles to managed methods.

use std::{
    ffi::{c_int, CStr},
    fmt,
    sync::{Arc, RwLock},
};

use crate::{
    callback::CallbackId,
    marshal::NativeString,
    native::{DelegateFn, NativeHost, DELEGATE_FLAG},
    runtime::RuntimeState,
    Error, Result,
};

/// A static managed method bound to a native function pointer.
///
/// Created by [`crate::Runtime::create_delegate`]. The delegate owns the marshalled assembly,
/// type and method names for as long as it lives, since the native side may keep referring to
/// them, and releases them when dropped. It also keeps the hosting library alive.
///
/// Invoking a delegate after its runtime has been shut down fails with
/// [`crate::Error::InvalidState`] without calling into native code. A shutdown requested while
/// a call is in progress waits for the call to return. A delegate must therefore not shut its
/// own runtime down from within the managed call.
///
/// # Examples
///
/// ```rust,no_run
/// use clrhost::{register_callback, Runtime, RuntimeParams};
///
/// let runtime = Runtime::create(RuntimeParams::default())?;
/// let on_tick = register_callback(|| println!("tick"));
///
/// let delegate = runtime.create_delegate("App", "App.Program", "Tick")?;
/// delegate.call()?;
/// delegate.call_with(on_tick)?;
/// # Ok::<(), clrhost::Error>(())
/// ```
pub struct ManagedDelegate {
    function: DelegateFn,
    assembly: NativeString,
    type_name: NativeString,
    method: NativeString,
    state: Arc<RwLock<RuntimeState>>,
    _host: Arc<dyn NativeHost>,
}

impl ManagedDelegate {
    pub(crate) fn new(
        function: DelegateFn,
        names: [NativeString; 3],
        state: Arc<RwLock<RuntimeState>>,
        host: Arc<dyn NativeHost>,
    ) -> Self {
        let [assembly, type_name, method] = names;
        ManagedDelegate {
            function,
            assembly,
            type_name,
            method,
            state,
            _host: host,
        }
    }

    /// Invokes the managed method with [`DELEGATE_FLAG`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidState`] if the runtime is no longer initialized.
    pub fn call(&self) -> Result<()> {
        self.invoke(DELEGATE_FLAG)
    }

    /// Invokes the managed method with a callback identity, which managed code can hand back
    /// to `clrhost_invoke_callback`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidState`] if the runtime is no longer initialized, or
    /// [`crate::Error::UnknownCallback`] if the identity does not fit a C `int`.
    pub fn call_with(&self, callback: CallbackId) -> Result<()> {
        let argument = c_int::try_from(callback).map_err(|_| Error::UnknownCallback(callback))?;
        self.invoke(argument)
    }

    /// Assembly the method was resolved from.
    pub fn assembly_name(&self) -> &CStr {
        self.assembly.as_c_str()
    }

    /// Type declaring the method.
    pub fn type_name(&self) -> &CStr {
        self.type_name.as_c_str()
    }

    /// Name of the method.
    pub fn method_name(&self) -> &CStr {
        self.method.as_c_str()
    }

    fn invoke(&self, argument: c_int) -> Result<()> {
        // Held across the call so shutdown waits for managed code still running.
        let state = read_lock!(self.state);
        if *state != RuntimeState::Initialized {
            return Err(Error::InvalidState {
                operation: "invoke a delegate",
                state: *state,
            });
        }

        unsafe { (self.function)(argument) };
        Ok(())
    }
}

impl fmt::Debug for ManagedDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedDelegate")
            .field("assembly", &self.assembly)
            .field("type_name", &self.type_name)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

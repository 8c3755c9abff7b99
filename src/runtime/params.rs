//! Initialization parameters of the runtime and their defaults.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::Result;

/// Friendly name of the application domain when none is configured.
pub const DEFAULT_APP_DOMAIN_FRIENDLY_NAME: &str = "app";

/// Property listing the directories managed assemblies are probed in.
pub const APP_PATHS: &str = "APP_PATHS";

/// Property listing the directories native libraries are probed in.
pub const NATIVE_DLL_SEARCH_DIRECTORIES: &str = "NATIVE_DLL_SEARCH_DIRECTORIES";

/// Initialization parameters of the runtime.
///
/// Empty values are filled in by [`crate::Runtime::init`]:
///
/// - `app_domain_friendly_name` becomes [`DEFAULT_APP_DOMAIN_FRIENDLY_NAME`]
/// - `exe_path` becomes the path of the host executable
/// - if neither [`APP_PATHS`] nor [`NATIVE_DLL_SEARCH_DIRECTORIES`] is set, both are set to
///   the directory of the host executable
/// - `clr_files_path` is resolved through the [`crate::native::Locator`]
///
/// # Examples
///
/// ```rust
/// use clrhost::RuntimeParams;
///
/// let params = RuntimeParams::default()
///     .with_managed_assembly_path("/opt/app/App.dll")
///     .with_property("System.GC.Server", "false");
/// assert_eq!(params.properties.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeParams {
    /// Path of the host executable.
    pub exe_path: PathBuf,

    /// Friendly name of the application domain.
    pub app_domain_friendly_name: String,

    /// Runtime properties, e.g. `APP_PATHS` or `System.GC.Server`.
    pub properties: HashMap<String, String>,

    /// Absolute path of the managed entry assembly, empty when running a standard executable.
    pub managed_assembly_path: PathBuf,

    /// Absolute path of the runtime's native files directory, empty to auto-detect.
    pub clr_files_path: PathBuf,
}

impl RuntimeParams {
    /// Sets the host executable path.
    pub fn with_exe_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.exe_path = path.into();
        self
    }

    /// Sets the application domain friendly name.
    pub fn with_app_domain_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.app_domain_friendly_name = name.into();
        self
    }

    /// Adds or replaces a runtime property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Sets the managed entry assembly.
    pub fn with_managed_assembly_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.managed_assembly_path = path.into();
        self
    }

    /// Sets the runtime's native files directory, bypassing auto-detection.
    pub fn with_clr_files_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.clr_files_path = path.into();
        self
    }

    /// Fills in the defaults described on [`RuntimeParams`], except the files directory.
    ///
    /// The host location is only queried when a default actually needs it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the host executable cannot be located.
    pub(crate) fn apply_defaults(&mut self, location: &SelfLocation) -> Result<()> {
        if self.app_domain_friendly_name.is_empty() {
            self.app_domain_friendly_name = DEFAULT_APP_DOMAIN_FRIENDLY_NAME.to_string();
        }

        if self.exe_path.as_os_str().is_empty() {
            self.exe_path = location.executable()?;
        }

        // Only injected when both are missing; one configured search path disables both.
        if self.property_is_empty(APP_PATHS)
            && self.property_is_empty(NATIVE_DLL_SEARCH_DIRECTORIES)
        {
            let directory = location.directory()?.to_string_lossy().into_owned();
            log::debug!("Defaulting assembly and native search paths to {}", directory);

            self.properties.insert(APP_PATHS.to_string(), directory.clone());
            self.properties
                .insert(NATIVE_DLL_SEARCH_DIRECTORIES.to_string(), directory);
        }

        Ok(())
    }

    fn property_is_empty(&self, key: &str) -> bool {
        self.properties.get(key).map_or(true, String::is_empty)
    }
}

/// Where the host executable lives.
///
/// Resolved from the running process by default; a fixed location can be injected, which is
/// what tests do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SelfLocation {
    /// Ask the operating system for the current executable.
    #[default]
    Current,
    /// Use this executable path.
    Fixed(PathBuf),
}

impl SelfLocation {
    /// Path of the host executable.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the current executable cannot be determined.
    pub fn executable(&self) -> Result<PathBuf> {
        match self {
            SelfLocation::Current => Ok(std::env::current_exe()?),
            SelfLocation::Fixed(path) => Ok(path.clone()),
        }
    }

    /// Directory containing the host executable.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the current executable cannot be determined.
    pub fn directory(&self) -> Result<PathBuf> {
        let executable = self.executable()?;
        Ok(executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> SelfLocation {
        SelfLocation::Fixed(PathBuf::from("/opt/app/host"))
    }

    #[test]
    fn empty_params_get_every_default() {
        let mut params = RuntimeParams::default();
        params.apply_defaults(&location()).unwrap();

        assert_eq!(params.app_domain_friendly_name, DEFAULT_APP_DOMAIN_FRIENDLY_NAME);
        assert_eq!(params.exe_path, PathBuf::from("/opt/app/host"));
        assert_eq!(params.properties[APP_PATHS], "/opt/app");
        assert_eq!(params.properties[NATIVE_DLL_SEARCH_DIRECTORIES], "/opt/app");
        assert!(params.clr_files_path.as_os_str().is_empty());
    }

    #[test]
    fn configured_values_are_kept() {
        let mut params = RuntimeParams::default()
            .with_exe_path("/usr/bin/custom")
            .with_app_domain_friendly_name("worker");
        params.apply_defaults(&location()).unwrap();

        assert_eq!(params.app_domain_friendly_name, "worker");
        assert_eq!(params.exe_path, PathBuf::from("/usr/bin/custom"));
    }

    #[test]
    fn one_search_path_disables_both_defaults() {
        let mut params = RuntimeParams::default().with_property(APP_PATHS, "/srv/assemblies");
        params.apply_defaults(&location()).unwrap();

        assert_eq!(params.properties[APP_PATHS], "/srv/assemblies");
        assert!(!params.properties.contains_key(NATIVE_DLL_SEARCH_DIRECTORIES));

        let mut params =
            RuntimeParams::default().with_property(NATIVE_DLL_SEARCH_DIRECTORIES, "/srv/native");
        params.apply_defaults(&location()).unwrap();

        assert!(!params.properties.contains_key(APP_PATHS));
        assert_eq!(params.properties[NATIVE_DLL_SEARCH_DIRECTORIES], "/srv/native");
    }

    #[test]
    fn empty_search_paths_count_as_absent() {
        let mut params = RuntimeParams::default()
            .with_property(APP_PATHS, "")
            .with_property(NATIVE_DLL_SEARCH_DIRECTORIES, "");
        params.apply_defaults(&location()).unwrap();

        assert_eq!(params.properties[APP_PATHS], "/opt/app");
        assert_eq!(params.properties[NATIVE_DLL_SEARCH_DIRECTORIES], "/opt/app");
    }

    #[test]
    fn current_location_resolves() {
        let location = SelfLocation::Current;
        let executable = location.executable().unwrap();
        assert_eq!(location.directory().unwrap(), executable.parent().unwrap());
    }
}

//! Discovery of the runtime's native files directory.
//!
//! The [`crate::native::locator::Locator`] decides which directory holds the hosting library
//! and the framework assemblies. An explicitly configured directory always wins; otherwise a
//! prioritized list of well-known installation directories is probed and the first one that
//! exists is selected.
//!
//! The probe is a pure decision over the candidate list plus filesystem existence checks, so
//! tests inject their own candidates through [`crate::native::locator::Locator::new`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use clrhost::native::Locator;
//!
//! let files_dir = Locator::default().locate(None)?;
//! println!("CoreCLR found in {}", files_dir.display());
//! # Ok::<(), clrhost::Error>(())
//! ```

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Well-known installation directories, most specific first.
#[cfg(unix)]
pub const DEFAULT_CANDIDATES: &[&str] = &[
    "/usr/local/share/dotnet/shared/Microsoft.NETCore.App/1.0.0",
    "/usr/share/dotnet/shared/Microsoft.NETCore.App/1.0.0",
];

/// Well-known installation directories, most specific first.
#[cfg(windows)]
pub const DEFAULT_CANDIDATES: &[&str] = &[
    "C:\\Windows\\Microsoft.NET\\Framework64\\v4.0.30319",
    "C:\\Windows\\Microsoft.NET\\Framework64\\v3.5",
    "C:\\Windows\\Microsoft.NET\\Framework64\\v3.0\\Windows Communication Foundation",
    "C:\\Windows\\Microsoft.NET\\Framework64\\v2.0.50727",
];

/// No well-known installation directories on this platform.
#[cfg(not(any(unix, windows)))]
pub const DEFAULT_CANDIDATES: &[&str] = &[];

/// Ordered list of candidate installation directories.
///
/// The first existing candidate is selected by [`Locator::locate`] unless an explicit
/// directory is supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    candidates: Vec<PathBuf>,
}

impl Locator {
    /// Creates a locator over an explicit candidate list, probed in the given order.
    pub fn new<I, P>(candidates: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Locator {
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }

    /// The candidates in probe order.
    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Returns the runtime's files directory.
    ///
    /// A non-empty `explicit` path is returned as-is without touching the filesystem. Otherwise
    /// each candidate is checked for existence in order and the first hit is returned.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RuntimeLocation`] if no explicit path was given and no candidate
    /// exists.
    pub fn locate(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit.filter(|path| !path.as_os_str().is_empty()) {
            log::debug!("Using configured runtime directory {}", path.display());
            return Ok(path.to_path_buf());
        }

        for candidate in &self.candidates {
            log::trace!("Probing runtime directory {}", candidate.display());
            if candidate.exists() {
                log::debug!("Selected runtime directory {}", candidate.display());
                return Ok(candidate.clone());
            }
        }

        Err(Error::RuntimeLocation)
    }
}

impl Default for Locator {
    fn default() -> Self {
        Locator::new(DEFAULT_CANDIDATES.iter().copied())
    }
}

//! Abstraction over the platform signal "which application is in the
//! foreground right now". The tracking core only ever sees the stream of app
//! names this module produces; how they are obtained is a backend detail.

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::client::config::MonitorMode;

/// Contract platform backends must implement. Returning `None` means no
/// application currently holds focus (lock screen, empty desktop), which the
/// tracker treats as the end of the open session.
#[cfg_attr(test, mockall::automock)]
pub trait AppProvider: Send {
    fn current_app(&mut self) -> Result<Option<Arc<str>>>;
}

/// Cross-platform [AppProvider] choosing a backend at compile time.
pub struct GenericAppProvider {
    inner: Box<dyn AppProvider>,
}

impl GenericAppProvider {
    /// Builds the backend for `mode`. Every backend so far only watches the
    /// single topmost window, so the other modes are rejected here rather
    /// than degraded silently.
    pub fn new(mode: MonitorMode) -> Result<Self> {
        if mode != MonitorMode::Topmost {
            bail!("Monitor mode {mode:?} is not implemented, only topmost tracking is available");
        }
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsAppProvider;
                Ok(Self {
                    inner: Box::new(WindowsAppProvider::new()),
                })
            }
            else if #[cfg(feature = "x11")] {
                use x11::X11AppProvider;
                Ok(Self {
                    inner: Box::new(X11AppProvider::new()?),
                })
            }
            else {
                // This runtime error is needed to allow the project to be compiled for during testing.
                unimplemented!("No app provider backend was specified")
            }
        }
    }
}

impl AppProvider for GenericAppProvider {
    fn current_app(&mut self) -> Result<Option<Arc<str>>> {
        self.inner.current_app()
    }
}

/// Normalizes a full executable path into the app name reported to the
/// server: the file name without its extension, lowercased.
pub fn app_name_from_exe(path: &str) -> Option<Arc<str>> {
    let file = path.rsplit(['/', '\\']).next()?;
    let stem = file.strip_suffix(".exe").unwrap_or(file);
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_lowercase().into())
}

#[cfg(test)]
mod tests {
    use crate::client::config::MonitorMode;

    use super::{app_name_from_exe, GenericAppProvider};

    #[test]
    fn unimplemented_monitor_modes_are_rejected() {
        assert!(GenericAppProvider::new(MonitorMode::Foreground).is_err());
        assert!(GenericAppProvider::new(MonitorMode::All).is_err());
    }

    #[test]
    fn exe_path_becomes_app_name() {
        assert_eq!(
            app_name_from_exe("C:\\Program Files\\Chrome\\chrome.exe").as_deref(),
            Some("chrome")
        );
        assert_eq!(app_name_from_exe("/usr/bin/Firefox").as_deref(), Some("firefox"));
        assert_eq!(app_name_from_exe(""), None);
    }
}

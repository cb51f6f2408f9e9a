use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::error;
use windows::{
    core::PWSTR,
    Win32::{
        Foundation::{CloseHandle, BOOL},
        System::Threading::{
            OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
            PROCESS_QUERY_LIMITED_INFORMATION,
        },
        UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId},
    },
};

use super::{app_name_from_exe, AppProvider};

fn foreground_exe() -> Result<Option<String>> {
    let window = unsafe { GetForegroundWindow() };
    if window.is_invalid() {
        // No window holds focus, e.g. on the lock screen.
        return Ok(None);
    }

    let mut id = 0u32;
    unsafe { GetWindowThreadProcessId(window, Some(&mut id)) };
    if id == 0 {
        return Err(anyhow!("Failed to resolve foreground window process"));
    }

    let process_handle = unsafe {
        OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, BOOL::from(false), id)
    }
    .inspect_err(|e| error!("Failed to open process {e:?}"))?;

    let mut text: [u16; 4096] = [0; 4096];
    let mut length = text.len() as u32;
    let query = unsafe {
        QueryFullProcessImageNameW(
            process_handle,
            PROCESS_NAME_WIN32,
            PWSTR(text.as_mut_ptr()),
            &mut length,
        )
    };

    unsafe { CloseHandle(process_handle) }
        .inspect_err(|e| error!("Failed to close handle {e:?}"))?;

    query?;
    Ok(Some(String::from_utf16_lossy(&text[..length as usize])))
}

pub struct WindowsAppProvider {}

impl WindowsAppProvider {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for WindowsAppProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AppProvider for WindowsAppProvider {
    fn current_app(&mut self) -> Result<Option<Arc<str>>> {
        let exe = foreground_exe()
            .inspect_err(|e| error!("Failed to get foreground application {e:?}"))?;
        Ok(exe.as_deref().and_then(app_name_from_exe))
    }
}

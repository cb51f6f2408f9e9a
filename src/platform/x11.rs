use std::sync::Arc;

use anyhow::Result;
use sysinfo::Pid;
use tracing::instrument;
use xcb::{
    x::{Atom, GetProperty, InternAtom, Window, ATOM_ANY},
    Connection,
};

use super::{app_name_from_exe, AppProvider};

fn intern_atom(conn: &Connection, name: &[u8]) -> Result<Atom> {
    let reply = conn.wait_for_reply(conn.send_request(&InternAtom {
        only_if_exists: false,
        name,
    }))?;
    Ok(reply.atom())
}

fn get_active_window(conn: &Connection, root: &Window, active_window_atom: Atom) -> Result<Option<Window>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window: *root,
        property: active_window_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    Ok(result.value::<Window>().first().copied())
}

fn get_pid(conn: &Connection, window: Window, pid_atom: Atom) -> Result<Option<u32>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property: pid_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    Ok(result.value::<u32>().first().copied())
}

fn get_process_exe(id: u32) -> Option<String> {
    let system = sysinfo::System::new_all();
    let process = system.process(Pid::from_u32(id))?;
    process.exe().and_then(|v| v.to_str()).map(|v| v.to_string())
}

pub struct X11AppProvider {
    connection: Connection,
    preferred_screen: i32,
    active_window_atom: Atom,
    pid_atom: Atom,
}

impl X11AppProvider {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = xcb::Connection::connect(None)?;
        let active_window_atom = intern_atom(&connection, b"_NET_ACTIVE_WINDOW")?;
        let pid_atom = intern_atom(&connection, b"_NET_WM_PID")?;
        Ok(Self {
            connection,
            preferred_screen,
            active_window_atom,
            pid_atom,
        })
    }
}

impl AppProvider for X11AppProvider {
    #[instrument(skip(self))]
    fn current_app(&mut self) -> Result<Option<Arc<str>>> {
        let setup = self.connection.get_setup();

        // Currently only 1 x11 screen is supported.
        let root = setup
            .roots()
            .nth(self.preferred_screen.max(0) as usize)
            .unwrap()
            .root();

        let Some(active) = get_active_window(&self.connection, &root, self.active_window_atom)?
        else {
            return Ok(None);
        };
        let Some(pid) = get_pid(&self.connection, active, self.pid_atom)? else {
            return Ok(None);
        };
        Ok(get_process_exe(pid).as_deref().and_then(app_name_from_exe))
    }
}

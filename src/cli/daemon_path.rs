use std::path::PathBuf;

/// Resolves the daemon executable installed next to the cli one.
pub fn to_daemon_path(mut path: PathBuf) -> PathBuf {
    path.set_file_name("heartbeat-daemon");
    #[cfg(windows)]
    {
        path.set_extension("exe");
    }
    path
}

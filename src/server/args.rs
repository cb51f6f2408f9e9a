use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
pub struct ServerArgs {
    #[arg(long, default_value_t = 8080, help = "Port to listen on")]
    pub port: u16,
    #[arg(
        long,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    pub dir: Option<PathBuf>,
}

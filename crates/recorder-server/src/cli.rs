use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "recorder-server", version)]
pub struct Args {
    /// TCP bind address for the streaming protocol
    #[arg(long, default_value = "0.0.0.0:5560")]
    pub bind: SocketAddr,

    /// Root directory where recordings are stored
    #[arg(long, default_value = "recordings")]
    pub store_root: PathBuf,

    /// Folder under the store root for fresh targets
    #[arg(long)]
    pub folder: Option<String>,

    /// List store folders and exit
    #[arg(long)]
    pub list_folders: bool,
}

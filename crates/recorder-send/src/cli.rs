use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "recorder-send", version)]
pub struct Args {
    /// Media file streamed as the capture device
    pub input: PathBuf,

    /// Server address
    #[arg(long, default_value = "127.0.0.1:5560")]
    pub connect: SocketAddr,

    /// Field name the recording is stored under
    #[arg(long, default_value = "recording")]
    pub field: String,

    /// Owning view name sent with the open request
    #[arg(long, default_value = "cli")]
    pub view: String,

    /// Owning row id, when the recording belongs to an existing record
    #[arg(long)]
    pub row_id: Option<i64>,

    /// MIME type of the capture (guessed from the input extension otherwise)
    #[arg(long)]
    pub mime: Option<String>,

    /// Resume into this serve path instead of creating a fresh target
    #[arg(long)]
    pub resume: Option<String>,

    /// Capture slice size in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    pub slice_bytes: usize,

    /// Milliseconds between capture slices (0 streams as fast as possible)
    #[arg(long, default_value_t = 1000)]
    pub slice_interval_ms: u64,
}

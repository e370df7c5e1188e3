//! Recorder client — streams a local media file to the recorder server the
//! way a live capture device would: sliced into chunks on a timed cadence,
//! one write per chunk, acknowledged in order.
//!
//! Prints the stored serve path on success.

mod cli;

use std::io::{IsTerminal, Write};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use recorder_send::device::FileCaptureDevice;
use recorder_send::link::{StreamLink, TcpStreamLink};
use recorder_send::panel::{Prompt, RecorderPanel, ToggleOutcome};
use recorder_send::recorder::PumpEvent;
use recorder_store::mime::mime_for_extension;
use tracing_subscriber::EnvFilter;

/// Operator confirmation on the terminal; non-interactive runs decline.
struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn confirm(&self, message: &str) -> bool {
        if !std::io::stdin().is_terminal() {
            return false;
        }
        eprint!("{message} [y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        answer.trim().eq_ignore_ascii_case("y")
    }
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,recorder_send=info")
        }))
        .init();

    let mime = match args.mime.clone() {
        Some(mime) => mime,
        None => args
            .input
            .extension()
            .and_then(|e| e.to_str())
            .and_then(mime_for_extension)
            .map(str::to_string)
            .ok_or_else(|| {
                anyhow!("cannot guess a MIME type for {:?}; pass --mime", args.input)
            })?,
    };

    let device = FileCaptureDevice::new(
        &args.input,
        mime.as_str(),
        args.slice_bytes,
        Duration::from_millis(args.slice_interval_ms),
    );

    let mut panel = RecorderPanel::new(
        args.view.as_str(),
        "Recorder",
        args.row_id,
        Box::new(StdinPrompt),
    );
    if let Some(target) = args.resume.clone() {
        panel.set_value(&args.field, target);
    }

    let connect = args.connect;
    let link_factory = move || {
        TcpStreamLink::connect(connect).map(|link| Box::new(link) as Box<dyn StreamLink>)
    };

    if args.resume.is_some() {
        panel
            .resume_into(&args.field, &device, &link_factory)
            .context("resume recording")?;
    } else {
        let outcome = panel
            .toggle(&args.field, &device, &link_factory)
            .context("start recording")?;
        if outcome == ToggleOutcome::Kept {
            tracing::info!(field = %args.field, "kept the existing recording");
            return Ok(());
        }
    }

    let mut sent: u64 = 0;
    let mut dropped: u64 = 0;
    loop {
        match panel.pump().context("forward chunk")? {
            PumpEvent::Forwarded(n) => sent += n as u64,
            PumpEvent::Gated(_) => {}
            PumpEvent::Dropped => dropped += 1,
            PumpEvent::SourceDrained => break,
        }
    }

    panel.stop(&args.field).context("stop recording")?;

    if dropped > 0 {
        tracing::warn!(dropped, "chunks were dropped by the server");
    }
    tracing::info!(field = %args.field, bytes = sent, "recording stored");
    if let Some(target) = panel.value(&args.field) {
        println!("{target}");
    }
    Ok(())
}

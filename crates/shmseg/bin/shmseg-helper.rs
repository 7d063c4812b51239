//! Helper process for multi-process segment tests.
//!
//! Attaches to an existing segment by `(key, size)` and then does one of:
//!
//! - `get-same`: verify every byte follows the `offset mod 256` pattern,
//!   request removal, detach
//! - `detach`: verify a prefix of the pattern, detach only
//! - `sleep`: stay attached until a timeout or a termination signal, then
//!   exit without detaching so the kernel cleans up

#![cfg(unix)]

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use shmseg::{Key, SegmentHandle};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::info;

/// What the helper does once attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HelperCommand {
    /// Verify the whole segment, then remove and detach
    GetSame,
    /// Verify a prefix, then detach without removing
    Detach,
    /// Stay attached until killed or the timeout expires
    Sleep,
}

#[derive(Debug, Parser)]
#[command(
    name = "shmseg-helper",
    about = "Attach to a shared memory segment from a separate process",
    version
)]
struct Args {
    /// Action to perform
    #[arg(long, value_enum, env = "SHMSEG_HELPER_CMD")]
    cmd: HelperCommand,

    /// Segment key
    #[arg(long, env = "SHMSEG_HELPER_KEY")]
    key: u32,

    /// Segment size in bytes
    #[arg(long, env = "SHMSEG_HELPER_SIZE")]
    size: usize,

    /// Bytes checked by `detach`
    #[arg(long, env = "SHMSEG_HELPER_VERIFY_LEN", default_value_t = 1 << 20)]
    verify_len: usize,

    /// Seconds `sleep` stays attached
    #[arg(long, env = "SHMSEG_HELPER_SECS", default_value_t = 30)]
    secs: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let key = Key::from(args.key);

    // Install handlers before attaching so a signal sent as soon as the
    // attachment is visible cannot hit the default disposition.
    let shutdown = match args.cmd {
        HelperCommand::Sleep => Some(ShutdownSignals::install()?),
        HelperCommand::GetSame | HelperCommand::Detach => None,
    };

    let mut segment = SegmentHandle::get(key, args.size)
        .with_context(|| format!("failed to get segment {key}"))?;
    segment
        .attach()
        .with_context(|| format!("failed to attach segment {}", segment.id()))?;

    info!(
        pid = std::process::id(),
        %key,
        id = segment.id(),
        cmd = ?args.cmd,
        "helper attached"
    );

    match args.cmd {
        HelperCommand::GetSame => {
            verify_pattern(segment.as_slice()?)?;
            let removal = segment.remove()?;
            info!(?removal, "requested removal");
            segment.detach()?;
        }
        HelperCommand::Detach => {
            let bytes = segment.as_slice()?;
            let len = args.verify_len.min(bytes.len());
            verify_pattern(&bytes[..len])?;
            segment.detach()?;
        }
        HelperCommand::Sleep => {
            if let Some(shutdown) = shutdown {
                shutdown.wait(Duration::from_secs(args.secs)).await;
            }
            // Exit with the segment still attached.
            std::mem::forget(segment);
        }
    }

    Ok(())
}

/// Check that every byte equals its offset modulo 256.
#[allow(clippy::cast_possible_truncation)]
fn verify_pattern(bytes: &[u8]) -> Result<()> {
    if let Some(offset) = bytes
        .iter()
        .enumerate()
        .position(|(i, &b)| b != i as u8)
    {
        bail!(
            "value mismatch at offset {offset}: expected {}, found {}",
            offset as u8,
            bytes[offset]
        );
    }
    info!(len = bytes.len(), "pattern verified");
    Ok(())
}

/// Termination signals that end a `sleep`.
struct ShutdownSignals {
    hangup: Signal,
    interrupt: Signal,
    terminate: Signal,
    quit: Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    async fn wait(mut self, timeout: Duration) {
        tokio::select! {
            () = tokio::time::sleep(timeout) => info!("sleep elapsed"),
            _ = self.hangup.recv() => info!("received SIGHUP"),
            _ = self.interrupt.recv() => info!("received SIGINT"),
            _ = self.terminate.recv() => info!("received SIGTERM"),
            _ = self.quit.recv() => info!("received SIGQUIT"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_pattern() {
        let good: Vec<u8> = (0..600u32).map(|i| (i % 256) as u8).collect();
        assert!(verify_pattern(&good).is_ok());

        let mut bad = good;
        bad[300] ^= 0xff;
        let err = verify_pattern(&bad).unwrap_err();
        assert!(err.to_string().contains("offset 300"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "shmseg-helper",
            "--cmd",
            "get-same",
            "--key",
            "42",
            "--size",
            "8192",
        ])
        .unwrap();
        assert_eq!(args.cmd, HelperCommand::GetSame);
        assert_eq!(args.key, 42);
        assert_eq!(args.size, 8192);
        assert_eq!(args.verify_len, 1 << 20);
        assert_eq!(args.secs, 30);
    }
}

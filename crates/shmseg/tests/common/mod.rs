#![allow(dead_code)]
#![allow(clippy::expect_used, clippy::panic)]

use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use shmseg::{Key, SegmentHandle};
use tempfile::NamedTempFile;

/// Helper binary built alongside the tests.
pub const HELPER: &str = env!("CARGO_BIN_EXE_shmseg-helper");

/// Derive a key from a fresh temp file so parallel tests never share one.
///
/// Keep the returned file alive for as long as the key is in use.
pub fn unique_key(discriminator: u32) -> (NamedTempFile, Key) {
    let file = NamedTempFile::new().expect("tempfile");
    let key = Key::derive(file.path(), discriminator).expect("derive key");
    (file, key)
}

/// Create a segment, or `None` when System V IPC is unavailable here.
pub fn create_or_skip(key: Key, size: usize) -> Option<SegmentHandle> {
    match SegmentHandle::create_or_get(key, size) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("skipping segment test (not available): {e}");
            None
        }
    }
}

/// Write `offset mod 256` into every byte.
pub fn fill_pattern(bytes: &mut [u8]) {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = i as u8;
    }
}

/// Build a helper invocation for `cmd` against `(key, size)`.
pub fn helper(cmd: &str, key: Key, size: usize) -> Command {
    let mut command = Command::new(HELPER);
    command
        .args(["--cmd", cmd])
        .args(["--key", &key.get().to_string()])
        .args(["--size", &size.to_string()])
        .stdout(Stdio::null());
    command
}

/// Poll the kernel until `expected` attachments exist.
///
/// Fails early if any child has already exited.
pub fn wait_for_attach_count(
    segment: &SegmentHandle,
    expected: u64,
    children: &mut [Child],
    timeout: Duration,
) {
    let start = Instant::now();
    loop {
        let count = segment.stat().expect("stat").attach_count;
        if count == expected {
            return;
        }
        for child in children.iter_mut() {
            if let Some(status) = child.try_wait().expect("try_wait") {
                panic!("helper exited early with {status}");
            }
        }
        assert!(
            start.elapsed() < timeout,
            "attach count stuck at {count}, expected {expected}"
        );
        thread::sleep(Duration::from_millis(20));
    }
}

/// True once the segment id no longer names a live segment.
pub fn is_destroyed(segment: &SegmentHandle) -> bool {
    segment.stat().is_err_and(|e| e.is_gone())
}

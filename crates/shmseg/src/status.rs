//! System-wide segment accounting from `ipcs -m -u`.
//!
//! util-linux prints a short summary:
//!
//! ```text
//! ------ Shared Memory Status --------
//! segments allocated 1
//! pages allocated 262144
//! pages resident  262144
//! pages swapped   0
//! Swap performance: 0 attempts     0 successes
//! ```
//!
//! Only the two `allocated` lines are used. Some systems print
//! `segments allocated` without a number when nothing is allocated. This
//! is diagnostics for tests and tooling; segment operations never consult it.

use std::process::Command;

use crate::{Result, ShmError};

const SEGMENTS_LABEL: &str = "segments allocated";
const PAGES_LABEL: &str = "pages allocated";

/// Count of allocated segments and pages across the system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpcsSummary {
    /// Number of segments currently allocated.
    pub segments: usize,
    /// Number of pages held by those segments.
    pub pages: usize,
}

impl IpcsSummary {
    /// Run `ipcs -m -u` and parse its output.
    pub fn query() -> Result<Self> {
        let output = Command::new("ipcs")
            .args(["-m", "-u"])
            .output()
            .map_err(ShmError::StatusUnavailable)?;

        if !output.status.success() {
            return Err(ShmError::StatusUnavailable(std::io::Error::other(format!(
                "ipcs exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))));
        }

        Self::parse(&String::from_utf8_lossy(&output.stdout))
    }

    /// Parse the summary text. Missing lines count as zero.
    pub fn parse(text: &str) -> Result<Self> {
        let mut summary = Self::default();

        for line in text.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix(SEGMENTS_LABEL) {
                summary.segments = parse_count(SEGMENTS_LABEL, rest)?;
            } else if let Some(rest) = line.strip_prefix(PAGES_LABEL) {
                summary.pages = parse_count(PAGES_LABEL, rest)?;
            }
        }

        Ok(summary)
    }

    /// Allocated bytes for the given page size.
    pub const fn bytes(&self, page_size: usize) -> usize {
        self.pages.saturating_mul(page_size)
    }

    /// Allocated bytes using this system's page size.
    pub fn bytes_for_system(&self) -> usize {
        self.bytes(crate::sys::page_size())
    }
}

fn parse_count(label: &str, rest: &str) -> Result<usize> {
    let value = rest.trim();
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse()
        .map_err(|e| ShmError::StatusParse(format!("{label} {value:?}: {e}")))
}

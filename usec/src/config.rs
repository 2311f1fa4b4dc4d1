//! Per-context device configuration.
//!
//! Everything that used to be a process-wide constant is carried here and
//! handed to the context at open time, so independent sessions can run
//! with different settings.

use crate::error::{Error, Result};
use crate::protocol::cdb::IMAGE_AREA_HEADER_LEN;
use crate::transport::MAX_TRANSFER_LEN;
use std::time::Duration;

/// Side length of an upload block in pixels.
pub const BLOCK_LEN: u32 = 32;

/// Default per-command timeout (50 s).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50_000);

/// Fast write is on unless disabled.
pub const FAST_WRITE_DEFAULT: bool = true;

/// Default delay between busy polls while waiting for a refresh.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Device configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Per-command timeout, also the deadline for readiness polling.
    pub timeout: Duration,
    /// Upload block side length in pixels.
    pub block_len: u32,
    /// Largest data phase per pass-through call.
    pub max_transfer: usize,
    /// Skip acknowledgements between contiguous block writes.
    pub fast_write: bool,
    /// Delay between busy polls.
    pub poll_interval: Duration,
    /// Issue INQUIRY when opening and log the identification.
    pub inquiry: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            block_len: BLOCK_LEN,
            max_transfer: MAX_TRANSFER_LEN,
            fast_write: FAST_WRITE_DEFAULT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            inquiry: true,
        }
    }
}

impl DeviceConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the command timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the upload block side length.
    #[must_use]
    pub fn with_block_len(mut self, block_len: u32) -> Self {
        self.block_len = block_len;
        self
    }

    /// Set the per-call transfer limit.
    #[must_use]
    pub fn with_max_transfer(mut self, max_transfer: usize) -> Self {
        self.max_transfer = max_transfer;
        self
    }

    /// Enable or disable fast write.
    #[must_use]
    pub fn with_fast_write(mut self, fast_write: bool) -> Self {
        self.fast_write = fast_write;
        self
    }

    /// Set the busy poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Enable or disable the INQUIRY at open.
    #[must_use]
    pub fn with_inquiry(mut self, inquiry: bool) -> Self {
        self.inquiry = inquiry;
        self
    }

    /// Bytes one upload block command carries at most.
    pub fn block_transfer_len(&self) -> usize {
        let side = self.block_len as usize;
        IMAGE_AREA_HEADER_LEN + side * side
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be non-zero".into()));
        }
        if self.block_len == 0 {
            return Err(Error::Config("block length must be non-zero".into()));
        }
        if self.max_transfer == 0 || self.max_transfer > MAX_TRANSFER_LEN {
            return Err(Error::Config(format!(
                "max transfer must be within 1..={MAX_TRANSFER_LEN} bytes, got {}",
                self.max_transfer
            )));
        }
        if self.block_transfer_len() > self.max_transfer {
            return Err(Error::Config(format!(
                "a {0}x{0} block needs {1} bytes per command, above the {2}-byte transfer limit",
                self.block_len,
                self.block_transfer_len(),
                self.max_transfer
            )));
        }
        Ok(())
    }
}

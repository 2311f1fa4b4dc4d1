//! Pass-through transport abstraction.
//!
//! The protocol layer never touches the OS directly. It hands a CDB, a data
//! phase and a sense buffer to a [`Transport`], which performs one blocking
//! pass-through call and reports the raw status:
//!
//! ```text
//!            +-------------------+
//!            |  Device context   |
//!            | (upload, update)  |
//!            +---------+---------+
//!                      |
//!            +---------v---------+
//!            |  Transport trait  |
//!            +----+---------+----+
//!                 |         |
//!     +-----------v--+   +--v-----------+
//!     |   SgDevice   |   |  Simulated   |
//!     |   (SG_IO)    |   |  controller  |
//!     +--------------+   +--------------+
//!          Linux            unit tests
//! ```

#[cfg(all(feature = "native", target_os = "linux"))]
pub mod sg;

use crate::error::Result;
use std::time::Duration;

/// Sense buffer capacity handed to every pass-through call.
pub const SENSE_LEN: usize = 256;

/// Largest data phase a single pass-through call may carry (60 KiB).
pub const MAX_TRANSFER_LEN: usize = 60 * 1024;

/// Data phase of a pass-through call.
#[derive(Debug)]
pub enum DataPhase<'a> {
    /// No data transfer.
    None,
    /// Host to device.
    Out(&'a [u8]),
    /// Device to host.
    In(&'a mut [u8]),
}

impl DataPhase<'_> {
    /// Number of bytes this phase transfers.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Out(buf) => buf.len(),
            Self::In(buf) => buf.len(),
        }
    }

    /// Whether the phase transfers no data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raw status of one pass-through call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    /// SCSI status byte.
    pub scsi_status: u8,
    /// Host adapter status.
    pub host_status: u16,
    /// Driver status.
    pub driver_status: u16,
    /// Number of sense bytes actually written.
    pub sense_len: usize,
    /// Residual count (requested minus transferred).
    pub resid: i32,
    /// Time the call took, as reported by the driver.
    pub duration: Duration,
}

impl CommandStatus {
    /// A status reporting unconditional success.
    pub const fn good() -> Self {
        Self {
            scsi_status: 0,
            host_status: 0,
            driver_status: 0,
            sense_len: 0,
            resid: 0,
            duration: Duration::ZERO,
        }
    }
}

impl Default for CommandStatus {
    fn default() -> Self {
        Self::good()
    }
}

/// One blocking pass-through call per `execute`.
///
/// Implementations:
///
/// - [`sg::SgDevice`] on Linux (`/dev/sgN`, `SG_IO`)
/// - in-crate test doubles simulating a controller
pub trait Transport {
    /// Issue `cdb` with the given data phase and wait for completion.
    ///
    /// `sense` is overwritten on every call. `Err` is reserved for failures
    /// of the OS call itself; device-level failures come back in the
    /// returned status for the caller to interpret.
    fn execute(
        &mut self,
        cdb: &[u8],
        data: DataPhase<'_>,
        timeout: Duration,
        sense: &mut [u8; SENSE_LEN],
    ) -> Result<CommandStatus>;

    /// Device node path or descriptive name.
    fn name(&self) -> &str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn execute(
        &mut self,
        cdb: &[u8],
        data: DataPhase<'_>,
        timeout: Duration,
        sense: &mut [u8; SENSE_LEN],
    ) -> Result<CommandStatus> {
        (**self).execute(cdb, data, timeout, sense)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// Re-export the native implementation
#[cfg(all(feature = "native", target_os = "linux"))]
pub use sg::SgDevice;

//! # usec
//!
//! A library for driving USB e-paper display controllers.
//!
//! IT8951-class controllers enumerate as USB mass storage devices and accept
//! vendor commands through SCSI pass-through. This crate provides:
//!
//! - CDB construction for every controller command
//! - Chunked image upload bounded by the pass-through buffer size
//! - Display refresh with any of the eight waveform modes, with readiness
//!   polling
//! - Sense data interpretation into typed errors
//!
//! Pixel buffers are 8 bits per pixel, row-major, ready to transfer. Image
//! decoding and dithering are left to the caller.
//!
//! ## Supported Platforms
//!
//! - **Linux** (`native` feature, default): `/dev/sgN` via the `SG_IO` ioctl
//! - Anything else through a custom [`Transport`]
//!
//! ## Features
//!
//! - `native` (default): Linux SCSI generic transport
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use usec::{DeviceConfig, Region, UpdateMode};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(all(feature = "native", target_os = "linux"))]
//!     {
//!         let config = DeviceConfig::new().with_fast_write(true);
//!         let mut device = usec::Device::open_with_config("/dev/sg2", config)?;
//!
//!         // Start from a clean white panel
//!         device.erase(true)?;
//!
//!         let (width, height) = (device.width(), device.height());
//!         let pixels = vec![0x00u8; (width * height) as usize];
//!         device.image_upload(&pixels, 0, 0, width, height)?;
//!         device.image_update(Region::full(width, height), UpdateMode::Gc16, true)?;
//!
//!         println!("panel at {} C", device.get_temperature()?);
//!         device.close();
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod config;
pub mod device;
pub mod error;
pub mod mode;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled by long-running loops
/// (block uploads, readiness polling).
///
/// The checker should return `true` when the current operation should stop,
/// for example after Ctrl-C in a CLI. Only the first registration sticks.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Raise or clear the interrupt request for the calling test thread.
///
/// The registered checker reads a thread-local flag, so tests running in
/// parallel never see each other's requests.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::cell::Cell;
    use std::sync::Once;

    thread_local! {
        static TEST_INTERRUPT_FLAG: Cell<bool> = const { Cell::new(false) };
    }
    static INSTALL: Once = Once::new();

    INSTALL.call_once(|| set_interrupt_checker(|| TEST_INTERRUPT_FLAG.with(Cell::get)));
    TEST_INTERRUPT_FLAG.with(|flag| flag.set(value));
}

// Re-exports for convenience
#[cfg(all(feature = "native", target_os = "linux"))]
pub use transport::SgDevice;
pub use {
    config::{BLOCK_LEN, DEFAULT_TIMEOUT, DeviceConfig, FAST_WRITE_DEFAULT},
    device::{Block, Device, Region, UpdateRequest, VCOM_RANGE_MV, plan_blocks},
    error::{Error, ErrorKind, Result},
    mode::UpdateMode,
    protocol::{InquiryData, Outcome, SenseInfo, SenseKey, SystemInfo, interpret},
    transport::{CommandStatus, DataPhase, MAX_TRANSFER_LEN, SENSE_LEN, Transport},
};

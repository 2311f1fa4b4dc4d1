//! Device context.
//!
//! A [`Device`] owns one open pass-through handle together with everything
//! the controller told us at open time: panel geometry, the image buffer
//! base address and the firmware identification. All commands go through
//! it, so `&mut self` gives the exclusive access the controller needs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use usec::{Device, Region, UpdateMode};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut device = Device::open("/dev/sg2")?;
//!     println!("panel is {}x{}", device.width(), device.height());
//!
//!     let pixels = vec![0x80u8; 64 * 64];
//!     device.image_upload(&pixels, 0, 0, 64, 64)?;
//!     device.image_update(Region::new(0, 0, 64, 64), UpdateMode::Gc16, true)?;
//!
//!     device.close();
//!     Ok(())
//! }
//! ```

pub mod update;
pub mod upload;

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::protocol::cdb::{Cdb, INQUIRY_LEN, SYSTEM_INFO_LEN};
use crate::protocol::info::{InquiryData, SystemInfo};
use crate::protocol::sense::{Outcome, interpret, log_sense};
use crate::transport::{CommandStatus, DataPhase, SENSE_LEN, Transport};
use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, trace, warn};
use std::ops::RangeInclusive;

pub use update::{Region, UpdateRequest};
pub use upload::{Block, plan_blocks};

/// VCOM magnitudes (millivolts) plausible for this panel class.
pub const VCOM_RANGE_MV: RangeInclusive<u16> = 200..=5000;

/// Transport plus the per-session command scratch state.
struct Link<T: Transport> {
    transport: T,
    sense: Box<[u8; SENSE_LEN]>,
    config: DeviceConfig,
}

impl<T: Transport> Link<T> {
    fn new(transport: T, config: DeviceConfig) -> Self {
        Self {
            transport,
            sense: Box::new([0u8; SENSE_LEN]),
            config,
        }
    }

    /// Issue one command and interpret its status.
    fn execute(&mut self, cdb: &Cdb, data: DataPhase<'_>) -> Result<()> {
        self.submit(cdb, data).map(|_| ())
    }

    /// Like [`Link::execute`], handing back the raw status on success.
    fn submit(&mut self, cdb: &Cdb, data: DataPhase<'_>) -> Result<CommandStatus> {
        if data.len() > self.config.max_transfer {
            return Err(Error::InvalidArgument(format!(
                "{} payload of {} bytes exceeds the {}-byte transfer limit",
                cdb.opcode(),
                data.len(),
                self.config.max_transfer
            )));
        }

        let status =
            self.transport
                .execute(cdb.as_bytes(), data, self.config.timeout, &mut self.sense)?;
        let outcome = interpret(&status, &self.sense[..]);
        if outcome != Outcome::Success {
            log_sense(cdb.opcode(), &status, &self.sense[..]);
        }
        outcome.into_result(cdb.opcode())?;
        Ok(status)
    }

    /// Issue a data-in command and return the `len` bytes it produced.
    ///
    /// A short transfer is an error; the unfilled tail is not data.
    fn read(&mut self, cdb: &Cdb, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let status = self.submit(cdb, DataPhase::In(&mut buf))?;
        if status.resid > 0 {
            let missing = usize::try_from(status.resid).unwrap_or(usize::MAX);
            return Err(Error::Protocol(format!(
                "{} transferred {} of {len} bytes",
                cdb.opcode(),
                len.saturating_sub(missing)
            )));
        }
        Ok(buf)
    }
}

/// An open session with one controller.
///
/// Generic over the transport so tests can drive it with a simulated
/// controller. Closing consumes the context.
pub struct Device<T: Transport> {
    link: Link<T>,
    info: SystemInfo,
    inquiry: Option<InquiryData>,
    /// Linear controller address the next contiguous block write lands on.
    cursor: u32,
}

impl<T: Transport> Device<T> {
    /// Open a session over an already opened transport.
    ///
    /// Validates `config`, identifies the controller and caches the panel
    /// geometry. Fails with [`Error::Protocol`] if the controller reports a
    /// zero-sized panel.
    pub fn with_transport(transport: T, config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let mut link = Link::new(transport, config);
        debug!("Opening controller on {}", link.transport.name());

        let inquiry = if link.config.inquiry {
            let raw = link.read(&Cdb::inquiry(), INQUIRY_LEN)?;
            let inquiry = InquiryData::parse(&raw)?;
            debug!(
                "INQUIRY: vendor '{}', product '{}', revision '{}'",
                inquiry.vendor, inquiry.product, inquiry.revision
            );
            Some(inquiry)
        } else {
            None
        };

        let raw = link.read(&Cdb::get_system_info(), SYSTEM_INFO_LEN)?;
        let info = SystemInfo::parse(&raw)?;
        if !info.has_valid_signature() {
            warn!(
                "Unexpected system info signature 0x{:08X}, continuing anyway",
                info.signature
            );
        }
        if info.width == 0 || info.height == 0 {
            return Err(Error::Protocol(format!(
                "controller reports an empty {}x{} panel",
                info.width, info.height
            )));
        }

        info!(
            "Opened {}: {}x{} panel, firmware {}, image buffer at 0x{:08X}",
            link.transport.name(),
            info.width,
            info.height,
            info.version_string(),
            info.image_buffer_addr
        );

        Ok(Self {
            cursor: info.image_buffer_addr,
            link,
            info,
            inquiry,
        })
    }

    /// Close the session and release the handle and scratch buffer.
    pub fn close(self) {
        debug!("Closing {}", self.link.transport.name());
    }

    /// Consume the context and return the underlying transport.
    pub fn into_transport(self) -> T {
        self.link.transport
    }

    /// Get a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.link.transport
    }

    /// Get a mutable reference to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.link.transport
    }

    /// Panel width in pixels.
    pub fn width(&self) -> u32 {
        self.info.width
    }

    /// Panel height in pixels.
    pub fn height(&self) -> u32 {
        self.info.height
    }

    /// The whole panel as a region.
    pub fn full_region(&self) -> Region {
        Region::full(self.info.width, self.info.height)
    }

    /// System information read at open time.
    pub fn system_info(&self) -> &SystemInfo {
        &self.info
    }

    /// INQUIRY data read at open time, if the config asked for it.
    pub fn inquiry_data(&self) -> Option<&InquiryData> {
        self.inquiry.as_ref()
    }

    /// Active configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.link.config
    }

    /// Issue a fresh INQUIRY.
    pub fn inquiry(&mut self) -> Result<InquiryData> {
        let raw = self.link.read(&Cdb::inquiry(), INQUIRY_LEN)?;
        InquiryData::parse(&raw)
    }

    /// Re-read the system information record.
    ///
    /// The cached geometry is left untouched.
    pub fn query_system_info(&mut self) -> Result<SystemInfo> {
        let raw = self
            .link
            .read(&Cdb::get_system_info(), SYSTEM_INFO_LEN)?;
        SystemInfo::parse(&raw)
    }

    /// Panel temperature in degrees Celsius.
    pub fn get_temperature(&mut self) -> Result<u8> {
        let raw = self.link.read(&Cdb::get_temperature(), 1)?;
        let temperature = raw[0];
        debug!("Panel temperature: {temperature} C");
        Ok(temperature)
    }

    /// VCOM magnitude in millivolts (1530 means -1.53 V).
    pub fn get_vcom(&mut self) -> Result<u16> {
        let raw = self.link.read(&Cdb::get_vcom(), 2)?;
        let vcom = BigEndian::read_u16(&raw);
        if !VCOM_RANGE_MV.contains(&vcom) {
            warn!("VCOM reading {vcom} mV is outside the usual range");
        }
        debug!("VCOM: -{}.{:02} V", vcom / 1000, (vcom % 1000) / 10);
        Ok(vcom)
    }

    /// Program the VCOM magnitude in millivolts.
    pub fn set_vcom(&mut self, millivolts: u16) -> Result<()> {
        if !VCOM_RANGE_MV.contains(&millivolts) {
            return Err(Error::InvalidArgument(format!(
                "VCOM {millivolts} mV outside {}..={} mV",
                VCOM_RANGE_MV.start(),
                VCOM_RANGE_MV.end()
            )));
        }
        info!("Setting VCOM to {millivolts} mV");
        self.link
            .execute(&Cdb::set_vcom(millivolts), DataPhase::None)
    }

    /// Wait for the controller to acknowledge preceding writes.
    fn acknowledge(&mut self) -> Result<()> {
        trace!("Acknowledge");
        self.link
            .execute(&Cdb::test_unit_ready(), DataPhase::None)
    }

    /// Reject empty regions and regions reaching past the panel.
    fn check_region(&self, region: &Region) -> Result<()> {
        if region.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "region {region} has no pixels"
            )));
        }
        if !region.fits_within(self.info.width, self.info.height) {
            return Err(Error::InvalidArgument(format!(
                "region {region} exceeds the {}x{} panel",
                self.info.width, self.info.height
            )));
        }
        Ok(())
    }

    /// Linear controller address of panel pixel (`x`, `y`).
    fn pixel_addr(&self, x: u32, y: u32) -> Result<u32> {
        let offset = u64::from(y) * u64::from(self.info.width) + u64::from(x);
        u64::from(self.info.image_buffer_addr)
            .checked_add(offset)
            .and_then(|addr| u32::try_from(addr).ok())
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "pixel ({x}, {y}) lies outside the 32-bit controller address space"
                ))
            })
    }
}

// Native-specific convenience constructors
#[cfg(all(feature = "native", target_os = "linux"))]
mod native_impl {
    use super::{Device, DeviceConfig, Result};
    use crate::transport::SgDevice;
    use std::path::Path;

    impl Device<SgDevice> {
        /// Open the controller behind a SCSI generic node with the default
        /// configuration.
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            Self::open_with_config(path, DeviceConfig::default())
        }

        /// Open the controller behind a SCSI generic node.
        pub fn open_with_config(path: impl AsRef<Path>, config: DeviceConfig) -> Result<Self> {
            let transport = SgDevice::open(path)?;
            Self::with_transport(transport, config)
        }
    }
}

//! Pass-through status and sense data interpretation.
//!
//! Every command returns a raw status triple (SCSI status, host status,
//! driver status) plus whatever sense bytes the device wrote. [`interpret`]
//! folds that into one [`Outcome`]; only the outcome drives control flow.
//! Sense decoding for logs happens on the side and never changes it.

use crate::error::{Error, Result};
use crate::protocol::cdb::Opcode;
use crate::transport::CommandStatus;
use log::debug;
use std::fmt;

/// SCSI status: command completed.
pub const STATUS_GOOD: u8 = 0x00;
/// SCSI status: sense data available.
pub const STATUS_CHECK_CONDITION: u8 = 0x02;
/// SCSI status: condition met (treated as good).
pub const STATUS_CONDITION_MET: u8 = 0x04;
/// SCSI status: target busy.
pub const STATUS_BUSY: u8 = 0x08;
/// SCSI status: task set full.
pub const STATUS_TASK_SET_FULL: u8 = 0x28;

/// Host status: no error.
pub const DID_OK: u16 = 0x00;
/// Host status: command timed out in the host adapter.
pub const DID_TIME_OUT: u16 = 0x03;

/// Driver status byte: no error.
pub const DRIVER_OK: u16 = 0x00;
/// Driver status byte: timeout.
pub const DRIVER_TIMEOUT: u16 = 0x06;
/// Driver status byte: sense buffer holds data.
pub const DRIVER_SENSE: u16 = 0x08;

/// Mask selecting the driver status byte (upper bits carry suggestions).
const DRIVER_MASK: u16 = 0x0F;

/// SCSI sense key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenseKey {
    /// No specific sense key.
    NoSense,
    /// Command succeeded after recovery.
    RecoveredError,
    /// Unit not ready.
    NotReady,
    /// Medium error.
    MediumError,
    /// Hardware failure.
    HardwareError,
    /// Invalid command or parameter.
    IllegalRequest,
    /// Unit attention (reset, media change).
    UnitAttention,
    /// Write protected.
    DataProtect,
    /// Blank check.
    BlankCheck,
    /// Vendor specific.
    VendorSpecific,
    /// Copy aborted.
    CopyAborted,
    /// Command aborted by the target.
    AbortedCommand,
    /// Volume overflow.
    VolumeOverflow,
    /// Miscompare.
    Miscompare,
    /// Completed.
    Completed,
    /// Reserved key value.
    Reserved(u8),
}

impl From<u8> for SenseKey {
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::NoSense,
            0x1 => Self::RecoveredError,
            0x2 => Self::NotReady,
            0x3 => Self::MediumError,
            0x4 => Self::HardwareError,
            0x5 => Self::IllegalRequest,
            0x6 => Self::UnitAttention,
            0x7 => Self::DataProtect,
            0x8 => Self::BlankCheck,
            0x9 => Self::VendorSpecific,
            0xA => Self::CopyAborted,
            0xB => Self::AbortedCommand,
            0xD => Self::VolumeOverflow,
            0xE => Self::Miscompare,
            0xF => Self::Completed,
            other => Self::Reserved(other),
        }
    }
}

impl fmt::Display for SenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSense => write!(f, "NO SENSE"),
            Self::RecoveredError => write!(f, "RECOVERED ERROR"),
            Self::NotReady => write!(f, "NOT READY"),
            Self::MediumError => write!(f, "MEDIUM ERROR"),
            Self::HardwareError => write!(f, "HARDWARE ERROR"),
            Self::IllegalRequest => write!(f, "ILLEGAL REQUEST"),
            Self::UnitAttention => write!(f, "UNIT ATTENTION"),
            Self::DataProtect => write!(f, "DATA PROTECT"),
            Self::BlankCheck => write!(f, "BLANK CHECK"),
            Self::VendorSpecific => write!(f, "VENDOR SPECIFIC"),
            Self::CopyAborted => write!(f, "COPY ABORTED"),
            Self::AbortedCommand => write!(f, "ABORTED COMMAND"),
            Self::VolumeOverflow => write!(f, "VOLUME OVERFLOW"),
            Self::Miscompare => write!(f, "MISCOMPARE"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Reserved(v) => write!(f, "RESERVED(0x{v:X})"),
        }
    }
}

/// Decoded sense data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseInfo {
    /// Sense key.
    pub key: SenseKey,
    /// Additional sense code.
    pub asc: u8,
    /// Additional sense code qualifier.
    pub ascq: u8,
}

impl SenseInfo {
    /// Parse fixed (0x70/0x71) or descriptor (0x72/0x73) format sense data.
    ///
    /// Returns `None` for empty, truncated or unrecognized buffers.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let response_code = data.first()? & 0x7F;
        match response_code {
            0x70 | 0x71 => {
                let key = SenseKey::from(*data.get(2)?);
                // ASC/ASCQ sit past the additional-length byte; short buffers
                // from some bridges stop before them.
                let asc = data.get(12).copied().unwrap_or(0);
                let ascq = data.get(13).copied().unwrap_or(0);
                Some(Self { key, asc, ascq })
            },
            0x72 | 0x73 => Some(Self {
                key: SenseKey::from(*data.get(1)?),
                asc: *data.get(2)?,
                ascq: *data.get(3)?,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for SenseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (asc 0x{:02X}, ascq 0x{:02X})",
            self.key, self.asc, self.ascq
        )
    }
}

/// Interpreted result of one pass-through call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Command completed.
    Success,
    /// Transport-level or transient failure; retryable by the caller.
    TransientIo(Option<SenseInfo>),
    /// Device rejected the command.
    DeviceFailure(Option<SenseInfo>),
    /// Command timed out.
    Timeout,
}

impl Outcome {
    /// Convert into a `Result`, attributing failures to `command`.
    pub fn into_result(self, command: Opcode) -> Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::TransientIo(sense) => Err(Error::Transient { command, sense }),
            Self::DeviceFailure(sense) => Err(Error::Device { command, sense }),
            Self::Timeout => Err(Error::Timeout(format!(
                "{command} did not complete within the command timeout"
            ))),
        }
    }
}

/// Map a raw pass-through status and sense buffer to an [`Outcome`].
///
/// `sense` is the full scratch buffer; only the first
/// `status.sense_len` bytes are considered.
pub fn interpret(status: &CommandStatus, sense: &[u8]) -> Outcome {
    let driver = status.driver_status & DRIVER_MASK;

    if status.host_status == DID_TIME_OUT || driver == DRIVER_TIMEOUT {
        return Outcome::Timeout;
    }
    if status.host_status != DID_OK {
        return Outcome::TransientIo(None);
    }

    let written = &sense[..status.sense_len.min(sense.len())];

    match status.scsi_status & 0xFE {
        STATUS_GOOD | STATUS_CONDITION_MET => {
            if driver == DRIVER_SENSE && !written.is_empty() {
                from_sense(written, true)
            } else if driver != DRIVER_OK && driver != DRIVER_SENSE {
                Outcome::TransientIo(None)
            } else {
                Outcome::Success
            }
        },
        STATUS_CHECK_CONDITION => from_sense(written, false),
        STATUS_BUSY | STATUS_TASK_SET_FULL => Outcome::TransientIo(None),
        _ => Outcome::DeviceFailure(None),
    }
}

/// Classify parsed sense data.
///
/// Informational keys only count as success when the command itself
/// completed (`completed`); under CHECK CONDITION the data phase is void.
fn from_sense(sense: &[u8], completed: bool) -> Outcome {
    let Some(info) = SenseInfo::parse(sense) else {
        return Outcome::DeviceFailure(None);
    };
    match info.key {
        SenseKey::NoSense | SenseKey::RecoveredError if completed => Outcome::Success,
        SenseKey::NotReady | SenseKey::UnitAttention => Outcome::TransientIo(Some(info)),
        _ => Outcome::DeviceFailure(Some(info)),
    }
}

/// Log a verbose decode of a failed command's sense data at debug level.
pub fn log_sense(command: Opcode, status: &CommandStatus, sense: &[u8]) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let written = &sense[..status.sense_len.min(sense.len())];
    let hex: Vec<String> = written.iter().map(|b| format!("{b:02X}")).collect();
    match SenseInfo::parse(written) {
        Some(info) => debug!(
            "{command}: status 0x{:02X} host 0x{:02X} driver 0x{:02X}, sense {info} [{}]",
            status.scsi_status,
            status.host_status,
            status.driver_status,
            hex.join(" ")
        ),
        None => debug!(
            "{command}: status 0x{:02X} host 0x{:02X} driver 0x{:02X}, undecodable sense [{}]",
            status.scsi_status,
            status.host_status,
            status.driver_status,
            hex.join(" ")
        ),
    }
}

//! Command descriptor blocks for the USB e-paper controller.
//!
//! The controller is an IT8951-class bridge that enumerates as a USB mass
//! storage device. Standard SCSI commands (INQUIRY, TEST UNIT READY) use
//! 6-byte CDBs; vendor commands use a 16-byte CDB tagged with `0xFE`:
//!
//! ```text
//! +------+------+----------------+--------+---------------------------+
//! | 0xFE | 0x00 | Address (BE32) | Opcode |   Operands (9 bytes)      |
//! +------+------+----------------+--------+---------------------------+
//! |  0   |  1   |     2..6       |   6    |         7..16             |
//! +------+------+----------------+--------+---------------------------+
//! ```
//!
//! Commands carrying structured arguments (load image area, display area)
//! send them big-endian in the data-out phase rather than in the CDB.

use byteorder::{BigEndian, ByteOrder};
use std::fmt;

/// Length of a vendor CDB.
pub const CDB_LEN: usize = 16;

/// Length of a standard 6-byte CDB.
pub const CDB6_LEN: usize = 6;

/// Tag byte identifying a vendor ("customer") command.
pub const VENDOR_TAG: u8 = 0xFE;

/// Allocation length of a standard INQUIRY response.
pub const INQUIRY_LEN: usize = 36;

/// Length of the system information record.
pub const SYSTEM_INFO_LEN: usize = 112;

/// Length of the load-image-area argument header preceding pixel data.
pub const IMAGE_AREA_HEADER_LEN: usize = 20;

/// Length of the display-area argument block.
pub const DISPLAY_AREA_ARGS_LEN: usize = 28;

/// Controller register holding the display engine (LUT) busy flags.
pub const LUT_BUSY_REG: u32 = 0x1800_1224;

/// Command operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// SCSI TEST UNIT READY (0x00).
    TestUnitReady = 0x00,
    /// SCSI INQUIRY (0x12).
    Inquiry = 0x12,
    /// Read system information (0x80).
    GetSystemInfo = 0x80,
    /// Read controller memory (0x81).
    ReadMemory = 0x81,
    /// Refresh a display area with a waveform (0x94).
    DisplayArea = 0x94,
    /// Load pixels into an image buffer area (0xA2).
    LoadImageArea = 0xA2,
    /// Power management IC control, including VCOM (0xA3).
    Pmic = 0xA3,
    /// Temperature sensor control (0xA4).
    Temperature = 0xA4,
}

impl Opcode {
    /// Whether this is a vendor command (16-byte CDB tagged `0xFE`).
    pub fn is_vendor(self) -> bool {
        !matches!(self, Self::TestUnitReady | Self::Inquiry)
    }

    /// Decode an opcode from a raw CDB.
    pub fn from_cdb(bytes: &[u8]) -> Option<Self> {
        let code = match bytes.first()? {
            &VENDOR_TAG => *bytes.get(6)?,
            &b => b,
        };
        Some(match code {
            0x00 => Self::TestUnitReady,
            0x12 => Self::Inquiry,
            0x80 => Self::GetSystemInfo,
            0x81 => Self::ReadMemory,
            0x94 => Self::DisplayArea,
            0xA2 => Self::LoadImageArea,
            0xA3 => Self::Pmic,
            0xA4 => Self::Temperature,
            _ => return None,
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TestUnitReady => "test unit ready",
            Self::Inquiry => "inquiry",
            Self::GetSystemInfo => "get system info",
            Self::ReadMemory => "read memory",
            Self::DisplayArea => "display area",
            Self::LoadImageArea => "load image area",
            Self::Pmic => "pmic control",
            Self::Temperature => "temperature",
        };
        f.write_str(name)
    }
}

/// A command descriptor block.
///
/// Built fresh for every command and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cdb {
    bytes: [u8; CDB_LEN],
    len: usize,
    opcode: Opcode,
}

impl Cdb {
    fn standard(opcode: Opcode) -> Self {
        let mut bytes = [0u8; CDB_LEN];
        bytes[0] = opcode as u8;
        Self {
            bytes,
            len: CDB6_LEN,
            opcode,
        }
    }

    fn vendor(opcode: Opcode) -> Self {
        let mut bytes = [0u8; CDB_LEN];
        bytes[0] = VENDOR_TAG;
        bytes[6] = opcode as u8;
        Self {
            bytes,
            len: CDB_LEN,
            opcode,
        }
    }

    /// TEST UNIT READY, used as the per-block acknowledgement.
    pub fn test_unit_ready() -> Self {
        Self::standard(Opcode::TestUnitReady)
    }

    /// Standard INQUIRY with a 36-byte allocation length.
    #[allow(clippy::cast_possible_truncation)]
    pub fn inquiry() -> Self {
        let mut cdb = Self::standard(Opcode::Inquiry);
        cdb.bytes[4] = INQUIRY_LEN as u8;
        cdb
    }

    /// Read the 112-byte system information record.
    ///
    /// Bytes 2..6 carry the ASCII signature "8951" and bytes 8/10 the
    /// fixed sub-command selector the firmware expects.
    pub fn get_system_info() -> Self {
        let mut cdb = Self::vendor(Opcode::GetSystemInfo);
        cdb.bytes[2..6].copy_from_slice(b"8951");
        cdb.bytes[8] = 0x01;
        cdb.bytes[10] = 0x02;
        cdb
    }

    /// Read `len` bytes of controller memory starting at `addr`.
    pub fn read_memory(addr: u32, len: u16) -> Self {
        let mut cdb = Self::vendor(Opcode::ReadMemory);
        BigEndian::write_u32(&mut cdb.bytes[2..6], addr);
        BigEndian::write_u16(&mut cdb.bytes[8..10], len);
        cdb
    }

    /// Load an image area; arguments and pixels travel in the data-out phase.
    pub fn load_image_area() -> Self {
        Self::vendor(Opcode::LoadImageArea)
    }

    /// Refresh an area; arguments travel in the data-out phase.
    pub fn display_area() -> Self {
        Self::vendor(Opcode::DisplayArea)
    }

    /// Read the current VCOM setting (2 bytes, big-endian millivolts).
    pub fn get_vcom() -> Self {
        Self::vendor(Opcode::Pmic)
    }

    /// Program a new VCOM value in millivolts.
    pub fn set_vcom(millivolts: u16) -> Self {
        let mut cdb = Self::vendor(Opcode::Pmic);
        BigEndian::write_u16(&mut cdb.bytes[7..9], millivolts);
        cdb.bytes[9] = 0x01;
        cdb
    }

    /// Read the panel temperature (1 byte, degrees Celsius).
    pub fn get_temperature() -> Self {
        Self::vendor(Opcode::Temperature)
    }

    /// The CDB bytes as sent on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// The command this CDB encodes.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }
}

/// Arguments of a load-image-area command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageAreaHeader {
    /// Image buffer base address.
    pub address: u32,
    /// Destination x.
    pub x: u32,
    /// Destination y.
    pub y: u32,
    /// Block width.
    pub width: u32,
    /// Block height.
    pub height: u32,
}

impl ImageAreaHeader {
    /// Encode the header into its 20-byte wire form.
    pub fn encode(&self) -> [u8; IMAGE_AREA_HEADER_LEN] {
        let mut buf = [0u8; IMAGE_AREA_HEADER_LEN];
        BigEndian::write_u32_into(
            &[self.address, self.x, self.y, self.width, self.height],
            &mut buf,
        );
        buf
    }

    /// Decode a header from the start of a data-out payload.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let header = data.get(..IMAGE_AREA_HEADER_LEN)?;
        let mut fields = [0u32; 5];
        BigEndian::read_u32_into(header, &mut fields);
        let [address, x, y, width, height] = fields;
        Some(Self {
            address,
            x,
            y,
            width,
            height,
        })
    }
}

/// Arguments of a display-area command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayAreaArgs {
    /// Image buffer base address.
    pub address: u32,
    /// Waveform mode ordinal.
    pub mode: u32,
    /// Area x.
    pub x: u32,
    /// Area y.
    pub y: u32,
    /// Area width.
    pub width: u32,
    /// Area height.
    pub height: u32,
    /// Non-zero asks the controller to track busy/ready for this refresh.
    pub wait_ready: u32,
}

impl DisplayAreaArgs {
    /// Encode the arguments into their 28-byte wire form.
    pub fn encode(&self) -> [u8; DISPLAY_AREA_ARGS_LEN] {
        let mut buf = [0u8; DISPLAY_AREA_ARGS_LEN];
        BigEndian::write_u32_into(
            &[
                self.address,
                self.mode,
                self.x,
                self.y,
                self.width,
                self.height,
                self.wait_ready,
            ],
            &mut buf,
        );
        buf
    }

    /// Decode arguments from a data-out payload.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let args = data.get(..DISPLAY_AREA_ARGS_LEN)?;
        let mut fields = [0u32; 7];
        BigEndian::read_u32_into(args, &mut fields);
        let [address, mode, x, y, width, height, wait_ready] = fields;
        Some(Self {
            address,
            mode,
            x,
            y,
            width,
            height,
            wait_ready,
        })
    }
}

//! Decoders for controller identification responses.

use crate::error::{Error, Result};
use crate::protocol::cdb::{INQUIRY_LEN, SYSTEM_INFO_LEN};
use byteorder::{BigEndian, ByteOrder};

/// Signature reported in the system information record ("8951" as BE32).
pub const SYSTEM_INFO_SIGNATURE: u32 = 0x3839_3531;

/// Number of waveform modes with a frame count entry.
pub const MODE_SLOTS: usize = 8;

/// System information record (112 bytes, all fields big-endian `u32`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemInfo {
    /// Number of standard commands supported.
    pub standard_cmd_count: u32,
    /// Number of extended commands supported.
    pub extended_cmd_count: u32,
    /// Record signature.
    pub signature: u32,
    /// Firmware version word.
    pub version: u32,
    /// Panel width in pixels.
    pub width: u32,
    /// Panel height in pixels.
    pub height: u32,
    /// Update buffer base address.
    pub update_buffer_addr: u32,
    /// Image buffer base address (upload destination).
    pub image_buffer_addr: u32,
    /// Number of temperature segments in the waveform.
    pub temperature_segments: u32,
    /// Number of waveform modes.
    pub mode_count: u32,
    /// Frame count per waveform mode.
    pub frame_counts: [u32; MODE_SLOTS],
    /// Number of image buffers.
    pub image_buffer_count: u32,
}

impl SystemInfo {
    /// Parse the raw record.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < SYSTEM_INFO_LEN {
            return Err(Error::Protocol(format!(
                "system info too short: {} bytes, expected {SYSTEM_INFO_LEN}",
                data.len()
            )));
        }
        let word = |i: usize| BigEndian::read_u32(&data[i * 4..i * 4 + 4]);

        let mut frame_counts = [0u32; MODE_SLOTS];
        BigEndian::read_u32_into(&data[40..72], &mut frame_counts);

        Ok(Self {
            standard_cmd_count: word(0),
            extended_cmd_count: word(1),
            signature: word(2),
            version: word(3),
            width: word(4),
            height: word(5),
            update_buffer_addr: word(6),
            image_buffer_addr: word(7),
            temperature_segments: word(8),
            mode_count: word(9),
            frame_counts,
            image_buffer_count: word(18),
        })
    }

    /// Whether the signature matches the expected controller family.
    pub fn has_valid_signature(&self) -> bool {
        self.signature == SYSTEM_INFO_SIGNATURE
    }

    /// Firmware version rendered as `major.minor`.
    pub fn version_string(&self) -> String {
        format!("{}.{}", self.version >> 16, self.version & 0xFFFF)
    }

    /// Encode back into the 112-byte wire form.
    pub fn encode(&self) -> [u8; SYSTEM_INFO_LEN] {
        let mut buf = [0u8; SYSTEM_INFO_LEN];
        BigEndian::write_u32_into(
            &[
                self.standard_cmd_count,
                self.extended_cmd_count,
                self.signature,
                self.version,
                self.width,
                self.height,
                self.update_buffer_addr,
                self.image_buffer_addr,
                self.temperature_segments,
                self.mode_count,
            ],
            &mut buf[..40],
        );
        BigEndian::write_u32_into(&self.frame_counts, &mut buf[40..72]);
        BigEndian::write_u32(&mut buf[72..76], self.image_buffer_count);
        buf
    }
}

/// Standard INQUIRY identification strings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InquiryData {
    /// Peripheral device type (low 5 bits of byte 0).
    pub device_type: u8,
    /// T10 vendor identification.
    pub vendor: String,
    /// Product identification.
    pub product: String,
    /// Product revision level.
    pub revision: String,
}

impl InquiryData {
    /// Parse a standard INQUIRY response.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < INQUIRY_LEN {
            return Err(Error::Protocol(format!(
                "inquiry response too short: {} bytes, expected {INQUIRY_LEN}",
                data.len()
            )));
        }
        Ok(Self {
            device_type: data[0] & 0x1F,
            vendor: ascii_field(&data[8..16]),
            product: ascii_field(&data[16..32]),
            revision: ascii_field(&data[32..36]),
        })
    }
}

fn ascii_field(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
        .trim()
        .to_string()
}

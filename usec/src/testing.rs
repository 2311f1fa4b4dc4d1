//! Simulated controller used by the unit tests.
//!
//! Keeps an image buffer and an "optical" panel, answers every command the
//! driver issues and records each call so tests can assert on the exact
//! command stream.

use crate::error::Result;
use crate::protocol::cdb::{
    DisplayAreaArgs, IMAGE_AREA_HEADER_LEN, INQUIRY_LEN, ImageAreaHeader, LUT_BUSY_REG, Opcode,
};
use crate::protocol::info::{SYSTEM_INFO_SIGNATURE, SystemInfo};
use crate::protocol::sense::{DID_TIME_OUT, DRIVER_SENSE, STATUS_CHECK_CONDITION};
use crate::transport::{CommandStatus, DataPhase, SENSE_LEN, Transport};
use byteorder::{BigEndian, ByteOrder};
use std::collections::VecDeque;
use std::time::Duration;

/// One pass-through call as seen by the simulator.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub opcode: Option<Opcode>,
    pub data_len: usize,
    pub data_out: Vec<u8>,
    pub timeout: Duration,
}

/// A canned failure returned instead of executing a command.
#[derive(Debug, Clone)]
pub(crate) struct Fault {
    opcode: Opcode,
    status: CommandStatus,
    sense: Vec<u8>,
    skip: usize,
}

impl Fault {
    fn check_condition(opcode: Opcode, sense: Vec<u8>) -> Self {
        Self {
            opcode,
            status: CommandStatus {
                scsi_status: STATUS_CHECK_CONDITION,
                driver_status: DRIVER_SENSE,
                sense_len: sense.len(),
                ..CommandStatus::good()
            },
            sense,
            skip: 0,
        }
    }

    fn fixed_sense(key: u8, asc: u8) -> Vec<u8> {
        let mut sense = vec![0u8; 18];
        sense[0] = 0x70;
        sense[2] = key;
        sense[7] = 10;
        sense[12] = asc;
        sense
    }

    /// ILLEGAL REQUEST, invalid field in parameter list.
    pub fn illegal_request(opcode: Opcode) -> Self {
        Self::check_condition(opcode, Self::fixed_sense(0x05, 0x26))
    }

    /// UNIT ATTENTION, power on or reset occurred.
    pub fn unit_attention(opcode: Opcode) -> Self {
        Self::check_condition(opcode, Self::fixed_sense(0x06, 0x29))
    }

    /// Check condition carrying arbitrary sense bytes.
    pub fn raw_sense(opcode: Opcode, sense: &[u8]) -> Self {
        Self::check_condition(opcode, sense.to_vec())
    }

    /// Good status, but `resid` bytes of the data-in phase never arrived.
    pub fn short_read(opcode: Opcode, resid: i32) -> Self {
        Self {
            opcode,
            status: CommandStatus {
                resid,
                ..CommandStatus::good()
            },
            sense: Vec::new(),
            skip: 0,
        }
    }

    /// Host adapter timeout.
    pub fn timeout(opcode: Opcode) -> Self {
        Self {
            opcode,
            status: CommandStatus {
                host_status: DID_TIME_OUT,
                ..CommandStatus::good()
            },
            sense: Vec::new(),
            skip: 0,
        }
    }
}

/// Simulated IT8951-class controller.
pub(crate) struct SimController {
    pub info: SystemInfo,
    /// Image buffer, one byte per panel pixel.
    pub memory: Vec<u8>,
    /// What the panel currently shows.
    pub panel: Vec<u8>,
    pub temperature: u8,
    pub vcom: u16,
    /// Busy answers the LUT register gives after each refresh.
    pub busy_per_refresh: u32,
    /// Never report idle.
    pub always_busy: bool,
    pub commands: Vec<Recorded>,
    busy_polls: u32,
    faults: VecDeque<Fault>,
}

impl SimController {
    /// A 960x540 controller.
    pub fn new() -> Self {
        Self::with_geometry(960, 540)
    }

    pub fn with_geometry(width: u32, height: u32) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            info: SystemInfo {
                standard_cmd_count: 8,
                extended_cmd_count: 12,
                signature: SYSTEM_INFO_SIGNATURE,
                version: 0x0001_0002,
                width,
                height,
                update_buffer_addr: 0x0011_0000,
                image_buffer_addr: 0x0011_9F00,
                temperature_segments: 14,
                mode_count: 8,
                frame_counts: [0; 8],
                image_buffer_count: 1,
            },
            memory: vec![0xFF; pixels],
            panel: vec![0xFF; pixels],
            temperature: 25,
            vcom: 1530,
            busy_per_refresh: 0,
            always_busy: false,
            commands: Vec::new(),
            busy_polls: 0,
            faults: VecDeque::new(),
        }
    }

    /// Fail the next command with the fault's opcode.
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    /// Let `skip` commands with `opcode` through, then fail with `fault`.
    pub fn fail_after(&mut self, opcode: Opcode, skip: usize, mut fault: Fault) {
        fault.opcode = opcode;
        fault.skip = skip;
        self.faults.push_back(fault);
    }

    pub fn opcodes(&self) -> Vec<Opcode> {
        self.commands
            .iter()
            .filter_map(|c| c.opcode)
            .collect()
    }

    pub fn count(&self, opcode: Opcode) -> usize {
        self.commands
            .iter()
            .filter(|c| c.opcode == Some(opcode))
            .count()
    }

    pub fn payloads(&self, opcode: Opcode) -> Vec<Vec<u8>> {
        self.commands
            .iter()
            .filter(|c| c.opcode == Some(opcode))
            .map(|c| c.data_out.clone())
            .collect()
    }

    pub fn image_area_headers(&self) -> Vec<ImageAreaHeader> {
        self.payloads(Opcode::LoadImageArea)
            .iter()
            .filter_map(|p| ImageAreaHeader::decode(p))
            .collect()
    }

    pub fn last_display_args(&self) -> Option<DisplayAreaArgs> {
        self.payloads(Opcode::DisplayArea)
            .last()
            .and_then(|p| DisplayAreaArgs::decode(p))
    }

    pub fn largest_transfer(&self) -> usize {
        self.commands
            .iter()
            .map(|c| c.data_len)
            .max()
            .unwrap_or(0)
    }

    pub fn busy(&self) -> bool {
        self.always_busy || self.busy_polls > 0
    }

    pub fn panel_pixel(&self, x: u32, y: u32) -> u8 {
        self.panel[self.index(x, y)]
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.info.width as usize + x as usize
    }

    fn in_bounds(&self, x: u32, y: u32, width: u32, height: u32) -> bool {
        u64::from(x) + u64::from(width) <= u64::from(self.info.width)
            && u64::from(y) + u64::from(height) <= u64::from(self.info.height)
    }

    fn take_fault(&mut self, opcode: Option<Opcode>) -> Option<Fault> {
        let pos = self
            .faults
            .iter()
            .position(|f| Some(f.opcode) == opcode)?;
        if self.faults[pos].skip > 0 {
            self.faults[pos].skip -= 1;
            return None;
        }
        self.faults.remove(pos)
    }

    fn read_memory(&mut self, cdb: &[u8], buf: &mut [u8]) -> Option<()> {
        let addr = BigEndian::read_u32(&cdb[2..6]);
        let len = usize::from(BigEndian::read_u16(&cdb[8..10]));
        if len != buf.len() {
            return None;
        }
        if addr == LUT_BUSY_REG {
            let busy = self.busy();
            self.busy_polls = self.busy_polls.saturating_sub(1);
            BigEndian::write_u32(buf.get_mut(..4)?, u32::from(busy));
            return Some(());
        }
        let start = usize::try_from(addr.checked_sub(self.info.image_buffer_addr)?).ok()?;
        buf.copy_from_slice(self.memory.get(start..start + len)?);
        Some(())
    }

    fn load_image_area(&mut self, data: &[u8]) -> Option<()> {
        let header = ImageAreaHeader::decode(data)?;
        let pixels = &data[IMAGE_AREA_HEADER_LEN..];
        let row_len = header.width as usize;
        if header.address != self.info.image_buffer_addr
            || pixels.len() != row_len * header.height as usize
            || !self.in_bounds(header.x, header.y, header.width, header.height)
        {
            return None;
        }
        for (row, chunk) in pixels.chunks(row_len).enumerate() {
            let start = self.index(header.x, header.y + row as u32);
            self.memory[start..start + row_len].copy_from_slice(chunk);
        }
        Some(())
    }

    fn display_area(&mut self, data: &[u8]) -> Option<()> {
        let args = DisplayAreaArgs::decode(data)?;
        if args.mode > 7 || !self.in_bounds(args.x, args.y, args.width, args.height) {
            return None;
        }
        for y in args.y..args.y + args.height {
            let start = self.index(args.x, y);
            let end = start + args.width as usize;
            if args.mode == 0 {
                self.panel[start..end].fill(0xFF);
            } else {
                self.panel[start..end].copy_from_slice(&self.memory[start..end]);
            }
        }
        self.busy_polls = self.busy_per_refresh;
        Some(())
    }
}

impl Transport for SimController {
    fn execute(
        &mut self,
        cdb: &[u8],
        data: DataPhase<'_>,
        timeout: Duration,
        sense: &mut [u8; SENSE_LEN],
    ) -> Result<CommandStatus> {
        sense.fill(0);
        let opcode = Opcode::from_cdb(cdb);
        self.commands.push(Recorded {
            opcode,
            data_len: data.len(),
            data_out: match &data {
                DataPhase::Out(buf) => buf.to_vec(),
                _ => Vec::new(),
            },
            timeout,
        });

        if let Some(fault) = self.take_fault(opcode) {
            let len = fault.sense.len().min(SENSE_LEN);
            sense[..len].copy_from_slice(&fault.sense[..len]);
            return Ok(fault.status);
        }

        let handled = match (opcode, data) {
            (Some(Opcode::TestUnitReady), DataPhase::None) => Some(()),
            (Some(Opcode::Inquiry), DataPhase::In(buf)) if buf.len() == INQUIRY_LEN => {
                buf.fill(b' ');
                buf[..8].fill(0);
                buf[8..15].copy_from_slice(b"Generic");
                buf[16..31].copy_from_slice(b"Storage RamDisc");
                buf[32..36].copy_from_slice(b"1.00");
                Some(())
            },
            (Some(Opcode::GetSystemInfo), DataPhase::In(buf)) => {
                let raw = self.info.encode();
                let len = buf.len().min(raw.len());
                buf[..len].copy_from_slice(&raw[..len]);
                Some(())
            },
            (Some(Opcode::ReadMemory), DataPhase::In(buf)) => self.read_memory(cdb, buf),
            (Some(Opcode::LoadImageArea), DataPhase::Out(buf)) => self.load_image_area(buf),
            (Some(Opcode::DisplayArea), DataPhase::Out(buf)) => self.display_area(buf),
            (Some(Opcode::Pmic), DataPhase::In(buf)) if buf.len() == 2 => {
                BigEndian::write_u16(buf, self.vcom);
                Some(())
            },
            (Some(Opcode::Pmic), DataPhase::None) if cdb[9] == 0x01 => {
                self.vcom = BigEndian::read_u16(&cdb[7..9]);
                Some(())
            },
            (Some(Opcode::Temperature), DataPhase::In(buf)) if buf.len() == 1 => {
                buf[0] = self.temperature;
                Some(())
            },
            _ => None,
        };

        if handled.is_some() {
            return Ok(CommandStatus::good());
        }
        let fault = Fault::illegal_request(Opcode::TestUnitReady);
        sense[..fault.sense.len()].copy_from_slice(&fault.sense);
        Ok(fault.status)
    }

    fn name(&self) -> &str {
        "simulator"
    }
}

//! Linux SCSI generic (`/dev/sgN`) pass-through via the `SG_IO` ioctl.

#![allow(unsafe_code)]

use {
    crate::{
        error::{Error, Result},
        transport::{CommandStatus, DataPhase, MAX_TRANSFER_LEN, SENSE_LEN, Transport},
    },
    libc::{c_int, c_uchar, c_uint, c_ushort, c_void},
    log::trace,
    std::{
        fs::{File, OpenOptions},
        io,
        os::fd::AsRawFd,
        path::Path,
        ptr,
        time::Duration,
    },
};

/// `SG_IO` ioctl request number.
const SG_IO: libc::c_ulong = 0x2285;

/// `interface_id` value for the v3 sg interface.
const SG_INTERFACE_ID: c_int = b'S' as c_int;

const SG_DXFER_NONE: c_int = -1;
const SG_DXFER_TO_DEV: c_int = -2;
const SG_DXFER_FROM_DEV: c_int = -3;

/// `struct sg_io_hdr` from `<scsi/sg.h>`.
#[repr(C)]
struct SgIoHdr {
    interface_id: c_int,
    dxfer_direction: c_int,
    cmd_len: c_uchar,
    mx_sb_len: c_uchar,
    iovec_count: c_ushort,
    dxfer_len: c_uint,
    dxferp: *mut c_void,
    cmdp: *const c_uchar,
    sbp: *mut c_uchar,
    timeout: c_uint,
    flags: c_uint,
    pack_id: c_int,
    usr_ptr: *mut c_void,
    status: c_uchar,
    masked_status: c_uchar,
    msg_status: c_uchar,
    sb_len_wr: c_uchar,
    host_status: c_ushort,
    driver_status: c_ushort,
    resid: c_int,
    duration: c_uint,
    info: c_uint,
}

/// SCSI generic device node.
pub struct SgDevice {
    file: File,
    name: String,
}

impl SgDevice {
    /// Open a pass-through capable device node read/write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self {
            file,
            name: path
                .display()
                .to_string(),
        })
    }
}

impl Transport for SgDevice {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn execute(
        &mut self,
        cdb: &[u8],
        mut data: DataPhase<'_>,
        timeout: Duration,
        sense: &mut [u8; SENSE_LEN],
    ) -> Result<CommandStatus> {
        if data.len() > MAX_TRANSFER_LEN {
            return Err(Error::InvalidArgument(format!(
                "data phase of {} bytes exceeds the {MAX_TRANSFER_LEN}-byte pass-through limit",
                data.len()
            )));
        }
        if cdb.is_empty() || cdb.len() > usize::from(u8::MAX) {
            return Err(Error::InvalidArgument(format!(
                "invalid CDB length {}",
                cdb.len()
            )));
        }

        let dxfer_len = data.len() as c_uint;
        let (direction, dxferp) = match &mut data {
            DataPhase::None => (SG_DXFER_NONE, ptr::null_mut()),
            // The kernel only reads through dxferp for TO_DEV transfers.
            DataPhase::Out(buf) => (SG_DXFER_TO_DEV, buf.as_ptr().cast_mut().cast::<c_void>()),
            DataPhase::In(buf) => (SG_DXFER_FROM_DEV, buf.as_mut_ptr().cast::<c_void>()),
        };

        sense.fill(0);
        let mut hdr = SgIoHdr {
            interface_id: SG_INTERFACE_ID,
            dxfer_direction: direction,
            cmd_len: cdb.len() as c_uchar,
            // mx_sb_len is a byte; the kernel writes at most 255 sense bytes.
            mx_sb_len: SENSE_LEN.min(usize::from(u8::MAX)) as c_uchar,
            iovec_count: 0,
            dxfer_len,
            dxferp,
            cmdp: cdb.as_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: timeout
                .as_millis()
                .min(u128::from(c_uint::MAX)) as c_uint,
            flags: 0,
            pack_id: 0,
            usr_ptr: ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        trace!(
            "SG_IO on {}: cdb {:02X?}, {} data bytes, timeout {:?}",
            self.name, cdb, dxfer_len, timeout
        );

        // SAFETY: every pointer in `hdr` refers to a buffer that outlives the
        // call (`cdb`, `data`, `sense`), lengths match those buffers, and
        // SG_IO is synchronous so the kernel releases them before returning.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO as _, ptr::addr_of_mut!(hdr)) };
        if rc < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        Ok(CommandStatus {
            scsi_status: hdr.status,
            host_status: hdr.host_status,
            driver_status: hdr.driver_status,
            sense_len: usize::from(hdr.sb_len_wr),
            resid: hdr.resid,
            duration: Duration::from_millis(u64::from(hdr.duration)),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

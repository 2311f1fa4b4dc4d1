//! Display refresh and readiness polling.

use crate::device::Device;
use crate::error::{Error, Result};
use crate::mode::UpdateMode;
use crate::protocol::cdb::{Cdb, DisplayAreaArgs, LUT_BUSY_REG};
use crate::transport::{DataPhase, Transport};
use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, trace};
use std::fmt;
use std::thread;
use std::time::Instant;

/// A rectangle on the panel, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Region {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Region {
    /// Create a region.
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A region covering a whole `width` x `height` panel.
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Whether the region covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels covered.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether the region lies entirely inside a `width` x `height` panel.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        matches!((right, bottom), (Some(r), Some(b)) if r <= width && b <= height)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.x, self.y
        )
    }
}

/// One refresh: where, with which waveform, and whether to block until done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Area to refresh.
    pub region: Region,
    /// Waveform.
    pub mode: UpdateMode,
    /// Block until the display engine is idle again.
    pub wait_ready: bool,
}

impl UpdateRequest {
    /// Request a blocking refresh of `region` with `mode`.
    pub fn new(region: Region, mode: UpdateMode) -> Self {
        Self {
            region,
            mode,
            wait_ready: true,
        }
    }

    /// Set whether to wait for the refresh to finish.
    #[must_use]
    pub fn with_wait_ready(mut self, wait_ready: bool) -> Self {
        self.wait_ready = wait_ready;
        self
    }
}

impl<T: Transport> Device<T> {
    /// Refresh `area` from the image buffer using `mode`.
    ///
    /// With `wait_ready`, blocks until the display engine goes idle or the
    /// configured timeout passes ([`Error::Timeout`]). Pixel values are not
    /// checked against what the mode can render.
    pub fn image_update(&mut self, area: Region, mode: UpdateMode, wait_ready: bool) -> Result<()> {
        self.check_region(&area)?;

        let args = DisplayAreaArgs {
            address: self.info.image_buffer_addr,
            mode: u32::from(mode.ordinal()),
            x: area.x,
            y: area.y,
            width: area.width,
            height: area.height,
            wait_ready: u32::from(wait_ready),
        };
        info!("Refreshing {area} with {mode}");
        self.link
            .execute(&Cdb::display_area(), DataPhase::Out(&args.encode()))?;

        if wait_ready {
            self.wait_ready()?;
        }
        Ok(())
    }

    /// Run an [`UpdateRequest`].
    pub fn refresh(&mut self, request: &UpdateRequest) -> Result<()> {
        self.image_update(request.region, request.mode, request.wait_ready)
    }

    /// Erase the whole panel to white with the INIT waveform.
    pub fn erase(&mut self, wait_ready: bool) -> Result<()> {
        let full = self.full_region();
        self.image_update(full, UpdateMode::Init, wait_ready)
    }

    /// Whether the display engine is still running a waveform.
    pub fn is_busy(&mut self) -> Result<bool> {
        let raw = self
            .link
            .read(&Cdb::read_memory(LUT_BUSY_REG, 4), 4)?;
        let flags = BigEndian::read_u32(&raw);
        trace!("LUT busy flags: 0x{flags:08X}");
        Ok(flags != 0)
    }

    /// Poll until the display engine is idle.
    ///
    /// Gives up with [`Error::Timeout`] once the configured command timeout
    /// has elapsed; the refresh may still be running at that point.
    pub fn wait_ready(&mut self) -> Result<()> {
        let timeout = self.link.config.timeout;
        let poll_interval = self.link.config.poll_interval;
        let start = Instant::now();
        let mut polls = 0u32;

        loop {
            polls += 1;
            if !self.is_busy()? {
                debug!(
                    "Display ready after {polls} polls ({:?})",
                    start.elapsed()
                );
                return Ok(());
            }
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            if start.elapsed() >= timeout {
                return Err(Error::Timeout(format!(
                    "display still busy after {} ms",
                    timeout.as_millis()
                )));
            }
            thread::sleep(poll_interval);
        }
    }
}

//! Chunked image upload and read-back.
//!
//! An upload rectangle is cut into blocks of at most `block_len` x
//! `block_len` pixels, in raster order: bands of `block_len` rows from top
//! to bottom, each band split left to right. Every block travels in its
//! own load-image-area command:
//!
//! ```text
//!  pos_x
//!    +--------+--------+----+
//!    |   0    |   1    | 2  |   band 0
//!    +--------+--------+----+
//!    |   3    |   4    | 5  |   band 1
//!    +--------+--------+----+
//!    |   6    |   7    | 8  |   band 2 (short)
//!    +--------+--------+----+
//! ```
//!
//! With fast write the controller is only asked to acknowledge when the
//! write address jumps (at a band wrap) and after the last block.

use crate::device::Device;
use crate::device::update::Region;
use crate::error::{Error, Result};
use crate::protocol::cdb::{Cdb, ImageAreaHeader};
use crate::transport::{DataPhase, Transport};
use log::{debug, trace};

/// One upload block, relative to the source image origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Column of the block's left edge in the source image.
    pub x: u32,
    /// Row of the block's top edge in the source image.
    pub y: u32,
    /// Block width.
    pub width: u32,
    /// Block height.
    pub height: u32,
}

impl Block {
    /// Number of pixels in the block.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Split a `width` x `height` image into raster-ordered blocks.
///
/// Returns an empty plan for an empty image or a zero block length.
pub fn plan_blocks(width: u32, height: u32, block_len: u32) -> Vec<Block> {
    if width == 0 || height == 0 || block_len == 0 {
        return Vec::new();
    }
    let columns = width.div_ceil(block_len);
    let bands = height.div_ceil(block_len);
    let mut blocks = Vec::with_capacity(columns as usize * bands as usize);

    for band in 0..bands {
        let y = band * block_len;
        let h = block_len.min(height - y);
        for column in 0..columns {
            let x = column * block_len;
            blocks.push(Block {
                x,
                y,
                width: block_len.min(width - x),
                height: h,
            });
        }
    }
    blocks
}

impl<T: Transport> Device<T> {
    /// Upload a row-major 8 bpp image into the controller image buffer at
    /// (`pos_x`, `pos_y`).
    ///
    /// Nothing is displayed until [`Device::image_update`]. On error the
    /// image buffer contents are unknown; upload again before refreshing.
    pub fn image_upload(
        &mut self,
        pixels: &[u8],
        pos_x: u32,
        pos_y: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.image_upload_with_progress(pixels, pos_x, pos_y, width, height, |_, _| {})
    }

    /// Like [`Device::image_upload`], reporting `(blocks_done, blocks_total)`
    /// after every block.
    pub fn image_upload_with_progress<F>(
        &mut self,
        pixels: &[u8],
        pos_x: u32,
        pos_y: u32,
        width: u32,
        height: u32,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let area = Region::new(pos_x, pos_y, width, height);
        self.check_region(&area)?;
        if pixels.len() != area.pixel_count() {
            return Err(Error::InvalidArgument(format!(
                "{width}x{height} image needs {} bytes, got {}",
                area.pixel_count(),
                pixels.len()
            )));
        }

        let fast_write = self.link.config.fast_write;
        let blocks = plan_blocks(width, height, self.link.config.block_len);
        let total = blocks.len();
        debug!(
            "Uploading {area} in {total} blocks (fast write {})",
            if fast_write { "on" } else { "off" }
        );

        self.cursor = self.pixel_addr(pos_x, pos_y)?;
        let mut payload = Vec::with_capacity(self.link.config.block_transfer_len());
        let mut acks = 0usize;

        for (index, block) in blocks.iter().enumerate() {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            let x = pos_x + block.x;
            let y = pos_y + block.y;
            let addr = self.pixel_addr(x, y)?;

            payload.clear();
            payload.extend_from_slice(
                &ImageAreaHeader {
                    address: self.info.image_buffer_addr,
                    x,
                    y,
                    width: block.width,
                    height: block.height,
                }
                .encode(),
            );
            let row_len = block.width as usize;
            for row in block.y..block.y + block.height {
                let start = row as usize * width as usize + block.x as usize;
                payload.extend_from_slice(&pixels[start..start + row_len]);
            }

            trace!(
                "Block {}/{total}: {}x{} at ({x}, {y}), address 0x{addr:08X}",
                index + 1,
                block.width,
                block.height
            );
            self.link
                .execute(&Cdb::load_image_area(), DataPhase::Out(&payload))?;
            self.cursor = addr.checked_add(block.width).ok_or_else(|| {
                Error::Protocol(format!(
                    "write cursor past 0x{addr:08X} leaves the 32-bit controller address space"
                ))
            })?;

            let contiguous = match blocks.get(index + 1) {
                Some(next) => self.pixel_addr(pos_x + next.x, pos_y + next.y)? == self.cursor,
                None => false,
            };
            if !(fast_write && contiguous) {
                self.acknowledge()?;
                acks += 1;
            }

            progress(index + 1, total);
        }

        debug!("Upload complete: {total} blocks, {acks} acknowledgements");
        Ok(())
    }

    /// Read a rectangle of the image buffer back, row-major.
    ///
    /// Each read-memory command stays within the transfer limit; rows
    /// spanning the whole panel are read as one contiguous run.
    #[allow(clippy::cast_possible_truncation)]
    pub fn image_read(&mut self, x: u32, y: u32, width: u32, height: u32) -> Result<Vec<u8>> {
        let area = Region::new(x, y, width, height);
        self.check_region(&area)?;

        let chunk_len = self
            .link
            .config
            .max_transfer
            .min(usize::from(u16::MAX));
        let runs: Vec<(u32, usize)> = if x == 0 && width == self.info.width {
            vec![(self.pixel_addr(0, y)?, area.pixel_count())]
        } else {
            (y..y + height)
                .map(|row| Ok((self.pixel_addr(x, row)?, width as usize)))
                .collect::<Result<_>>()?
        };

        let mut pixels = Vec::with_capacity(area.pixel_count());
        for (mut addr, mut remaining) in runs {
            while remaining > 0 {
                let len = remaining.min(chunk_len);
                let data = self
                    .link
                    .read(&Cdb::read_memory(addr, len as u16), len)?;
                pixels.extend_from_slice(&data);
                remaining -= len;
                if remaining > 0 {
                    addr = addr.checked_add(len as u32).ok_or_else(|| {
                        Error::Protocol(format!(
                            "read past 0x{addr:08X} leaves the 32-bit controller address space"
                        ))
                    })?;
                }
            }
        }
        debug!("Read back {area} ({} bytes)", pixels.len());
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::{open_sim, test_config};
    use crate::error::ErrorKind;
    use crate::protocol::cdb::{IMAGE_AREA_HEADER_LEN, Opcode};
    use crate::testing::{Fault, SimController};
    use crate::transport::MAX_TRANSFER_LEN;

    fn checkerboard(width: u32, height: u32) -> Vec<u8> {
        (0..height)
            .flat_map(|y| (0..width).map(move |x| if (x / 8 + y / 8) % 2 == 0 { 0x00 } else { 0xF0 }))
            .collect()
    }

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        (0..width * height)
            .map(|i| (i % 251) as u8)
            .collect()
    }

    #[test]
    fn test_plan_covers_every_pixel_once() {
        for (width, height) in [(1, 1), (31, 33), (32, 32), (65, 7), (100, 70), (960, 540)] {
            let blocks = plan_blocks(width, height, 32);
            let mut seen = vec![0u8; (width * height) as usize];
            for block in &blocks {
                assert!(block.width >= 1 && block.width <= 32);
                assert!(block.height >= 1 && block.height <= 32);
                for y in block.y..block.y + block.height {
                    for x in block.x..block.x + block.width {
                        seen[(y * width + x) as usize] += 1;
                    }
                }
            }
            assert!(seen.iter().all(|&n| n == 1), "{width}x{height}");
        }
    }

    #[test]
    fn test_plan_is_raster_ordered() {
        let blocks = plan_blocks(70, 40, 32);
        let origins: Vec<_> = blocks.iter().map(|b| (b.x, b.y)).collect();
        assert_eq!(origins, vec![(0, 0), (32, 0), (64, 0), (0, 32), (32, 32), (64, 32)]);
        assert_eq!(blocks[2].width, 6);
        assert_eq!(blocks[5].height, 8);
        assert!(plan_blocks(0, 10, 32).is_empty());
    }

    #[test]
    fn test_64x64_upload_issues_four_blocks() {
        let mut device = open_sim(SimController::new());
        device
            .image_upload(&checkerboard(64, 64), 0, 0, 64, 64)
            .unwrap();

        let sim = device.transport();
        let headers = sim.image_area_headers();
        assert_eq!(headers.len(), 4);
        let origins: Vec<_> = headers.iter().map(|h| (h.x, h.y)).collect();
        assert_eq!(origins, vec![(0, 0), (32, 0), (0, 32), (32, 32)]);
        for header in &headers {
            assert_eq!((header.width, header.height), (32, 32));
            assert_eq!(header.address, sim.info.image_buffer_addr);
        }
    }

    #[test]
    fn test_fast_write_acknowledges_at_band_wrap() {
        let mut device = open_sim(SimController::new());
        device
            .image_upload(&gradient(96, 64), 0, 0, 96, 64)
            .unwrap();

        use Opcode::{LoadImageArea as L, TestUnitReady as A};
        let opcodes = device.transport().opcodes();
        assert_eq!(&opcodes[2..], &[L, L, L, A, L, L, L, A]);
    }

    #[test]
    fn test_slow_write_acknowledges_every_block() {
        let config = test_config().with_fast_write(false);
        let mut device = Device::with_transport(SimController::new(), config).unwrap();
        device
            .image_upload(&gradient(96, 64), 0, 0, 96, 64)
            .unwrap();

        let sim = device.transport();
        assert_eq!(sim.count(Opcode::LoadImageArea), 6);
        assert_eq!(sim.count(Opcode::TestUnitReady), 6);
    }

    #[test]
    fn test_fast_and_slow_paths_write_identical_blocks() {
        let pixels = checkerboard(100, 70);

        let mut fast = open_sim(SimController::new());
        fast.image_upload(&pixels, 13, 5, 100, 70).unwrap();

        let config = test_config().with_fast_write(false);
        let mut slow = Device::with_transport(SimController::new(), config).unwrap();
        slow.image_upload(&pixels, 13, 5, 100, 70).unwrap();

        assert_eq!(
            fast.transport().payloads(Opcode::LoadImageArea),
            slow.transport().payloads(Opcode::LoadImageArea)
        );
        assert_eq!(fast.transport().memory, slow.transport().memory);
    }

    #[test]
    fn test_cursor_tracks_last_block() {
        let mut device = open_sim(SimController::new());
        device
            .image_upload(&gradient(40, 40), 10, 2, 40, 40)
            .unwrap();
        // Last block covers columns 42..50 of rows 34..42
        let base = device.system_info().image_buffer_addr;
        assert_eq!(device.cursor, base + 34 * 960 + 42 + 8);
    }

    #[test]
    fn test_upload_read_back_round_trip() {
        let mut device = open_sim(SimController::new());
        let pixels = gradient(77, 45);
        device.image_upload(&pixels, 31, 17, 77, 45).unwrap();
        assert_eq!(device.image_read(31, 17, 77, 45).unwrap(), pixels);

        // Neighbouring pixels are untouched
        assert_eq!(device.image_read(30, 17, 1, 1).unwrap(), vec![0xFF]);
        assert_eq!(device.image_read(108, 61, 1, 1).unwrap(), vec![0xFF]);
    }

    #[test]
    fn test_full_panel_upload_stays_within_transfer_limit() {
        let mut device = open_sim(SimController::new());
        let pixels = gradient(960, 540);
        device.image_upload(&pixels, 0, 0, 960, 540).unwrap();
        assert_eq!(device.image_read(0, 0, 960, 540).unwrap(), pixels);

        let sim = device.transport();
        assert_eq!(sim.count(Opcode::LoadImageArea), 30 * 17);
        assert!(sim.largest_transfer() <= MAX_TRANSFER_LEN);
        // 960 * 540 bytes read back in more than one call
        assert!(sim.count(Opcode::ReadMemory) > 1);
    }

    #[test]
    fn test_large_blocks_respect_transfer_limit() {
        let config = test_config().with_block_len(200);
        let mut device = Device::with_transport(SimController::new(), config).unwrap();
        device
            .image_upload(&gradient(400, 400), 0, 0, 400, 400)
            .unwrap();
        let sim = device.transport();
        assert_eq!(sim.count(Opcode::LoadImageArea), 4);
        assert_eq!(
            sim.largest_transfer(),
            IMAGE_AREA_HEADER_LEN + 200 * 200
        );
    }

    #[test]
    fn test_upload_progress() {
        let mut device = open_sim(SimController::new());
        let mut reports = Vec::new();
        device
            .image_upload_with_progress(&gradient(64, 40), 0, 0, 64, 40, |done, total| {
                reports.push((done, total));
            })
            .unwrap();
        assert_eq!(reports, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
    }

    #[test]
    fn test_upload_preconditions() {
        let mut device = open_sim(SimController::new());
        let before = device.transport().commands.len();

        let err = device
            .image_upload(&[0u8; 10], 0, 0, 4, 4)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        let err = device.image_upload(&[], 0, 0, 0, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        let err = device
            .image_upload(&[0u8; 4], 959, 0, 2, 2)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        let err = device
            .image_upload(&[0u8; 2], 0, u32::MAX, 1, 2)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);

        assert_eq!(device.transport().commands.len(), before);
    }

    #[test]
    fn test_upload_stops_before_next_block_when_interrupted() {
        let mut device = open_sim(SimController::new());
        let before = device.transport().count(Opcode::LoadImageArea);

        let err = device
            .image_upload_with_progress(&gradient(96, 64), 0, 0, 96, 64, |done, _| {
                if done == 2 {
                    crate::test_set_interrupted(true);
                }
            })
            .unwrap_err();
        crate::test_set_interrupted(false);

        assert!(matches!(err, Error::Interrupted));
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert_eq!(device.transport().count(Opcode::LoadImageArea) - before, 2);

        // The next upload starts over normally
        device
            .image_upload(&gradient(96, 64), 0, 0, 96, 64)
            .unwrap();
    }

    #[test]
    fn test_short_read_back_is_protocol_error() {
        let mut sim = SimController::new();
        sim.inject(Fault::short_read(Opcode::ReadMemory, 100));
        let mut device = open_sim(sim);
        let err = device.image_read(0, 0, 960, 2).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("1820 of 1920 bytes"));
    }

    #[test]
    fn test_addresses_at_top_of_address_space_do_not_overflow() {
        let mut sim = SimController::with_geometry(64, 1);
        sim.info.image_buffer_addr = u32::MAX - 63;
        let mut device = open_sim(sim);

        // The last pixel sits at 0xFFFFFFFF; reading it back is fine
        assert_eq!(device.image_read(0, 0, 64, 1).unwrap(), vec![0xFF; 64]);

        // Nothing can follow the last block, so the cursor cannot advance
        let err = device
            .image_upload(&[0x00; 64], 0, 0, 64, 1)
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_upload_aborts_on_first_failure() {
        let mut sim = SimController::new();
        sim.fail_after(Opcode::LoadImageArea, 1, Fault::illegal_request(Opcode::LoadImageArea));
        let mut device = open_sim(sim);
        let err = device
            .image_upload(&gradient(64, 64), 0, 0, 64, 64)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Device);
        // Block 0 accepted, block 1 rejected, nothing after it
        assert_eq!(device.transport().count(Opcode::LoadImageArea), 2);
        assert_eq!(device.transport().count(Opcode::TestUnitReady), 0);
    }
}

/* Rev-A protocol engine: sequences HELLO -> orientation -> window+pixel
 * writes over a `Transport`. Owns no hardware handle itself — every call
 * takes the transport by reference, the same seam the driver trait in the
 * teacher framework uses to keep protocol logic hardware-agnostic. */
use std::time::Instant;

use tracing::debug;

use crate::codec::{self, Command};
use crate::error::{EngineError, Result};
use crate::models::{sub_revision_from_echo, DirtyRect, SendMode, SendStats, SubRevision};
use crate::transport::Transport;

const DEFAULT_HELLO_TIMEOUT_MS: u64 = 500;

pub struct RevAProtocol {
    width: u32,
    height: u32,
    chunk_size: usize,
    sub_revision: SubRevision,
}

impl RevAProtocol {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            chunk_size: width as usize * 8,
            sub_revision: crate::models::SUB_REVISION_UNKNOWN,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sub_revision(&self) -> SubRevision {
        self.sub_revision
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size;
    }

    /// Send six HELLO bytes and read the echo. A zero-length or exact
    /// 6-byte echo is accepted (legacy devices accept commands silently);
    /// anything else is a handshake failure.
    pub fn hello(&mut self, transport: &mut dyn Transport, timeout_ms: u64) -> Result<()> {
        transport.write(&[Command::Hello as u8; 6])?;
        let echo = transport.read(6, Some(timeout_ms))?;
        if !(echo.is_empty() || echo.len() == 6) {
            return Err(EngineError::HandshakeFailed(format!(
                "unexpected HELLO echo length {}",
                echo.len()
            )));
        }
        self.sub_revision = if echo.len() == 6 {
            let mut arr = [0u8; 6];
            arr.copy_from_slice(&echo);
            sub_revision_from_echo(&arr)
        } else {
            crate::models::SUB_REVISION_UNKNOWN
        };
        debug!(sub_revision = self.sub_revision.name, "hello complete");
        Ok(())
    }

    /// Program the device orientation/logical resolution.
    pub fn set_orientation(&mut self, transport: &mut dyn Transport, width: u32, height: u32, landscape: bool) -> Result<()> {
        let payload = codec::build_orientation_payload(width, height, landscape);
        transport.write(&payload)?;
        self.width = width;
        self.height = height;
        self.chunk_size = width as usize * 8;
        Ok(())
    }

    /// Full handshake: HELLO then orientation, landscape at this engine's
    /// configured resolution.
    pub fn handshake(&mut self, transport: &mut dyn Transport, timeout_ms: u64) -> Result<()> {
        self.hello(transport, timeout_ms)?;
        self.set_orientation(transport, self.width, self.height, true)
    }

    /// Write the window header for an inclusive pixel rectangle.
    pub fn set_window(&self, transport: &mut dyn Transport, x0: u32, y0: u32, x1: u32, y1: u32) -> Result<()> {
        let header = codec::pack_header(Command::DisplayBitmap, x0, y0, x1, y1)
            .map_err(EngineError::InvalidArgument)?;
        transport.write(&header)?;
        Ok(())
    }

    pub fn set_brightness(&self, transport: &mut dyn Transport, percent: u8) -> Result<()> {
        let absolute = codec::brightness_to_absolute(percent);
        let header = codec::pack_header(Command::SetBrightness, absolute as u32, 0, 0, 0)
            .map_err(EngineError::InvalidArgument)?;
        transport.write(&header)?;
        Ok(())
    }

    /// Transmit a full `width * height * 2` byte RGB565 frame, chunked by
    /// `chunk_size` bytes.
    pub fn send_frame(&self, transport: &mut dyn Transport, frame: &[u8]) -> Result<SendStats> {
        let expected = self.width as usize * self.height as usize * 2;
        if frame.len() != expected {
            return Err(EngineError::InvalidArgument(format!(
                "frame length {} does not match {}x{} RGB565 buffer ({} bytes)",
                frame.len(),
                self.width,
                self.height,
                expected
            )));
        }

        let start = Instant::now();
        let mut stats = SendStats::new(SendMode::Full);

        self.set_window(transport, 0, 0, self.width - 1, self.height - 1)?;
        stats.bytes_sent += 6;
        stats.packets_sent += 1;

        for chunk in frame.chunks(self.chunk_size.max(1)) {
            transport.write(chunk)?;
            stats.bytes_sent += chunk.len() as u64;
            stats.packets_sent += 1;
        }

        stats.duration_s = start.elapsed().as_secs_f64();
        Ok(stats)
    }

    /// Transmit only the given dirty rectangles, row by row, copying each
    /// row's bytes out of `frame` at the full-frame stride. Empty `rects`
    /// does no I/O and reports `SendMode::Noop`.
    pub fn send_dirty_rects(&self, transport: &mut dyn Transport, rects: &[DirtyRect], frame: &[u8]) -> Result<SendStats> {
        if rects.is_empty() {
            return Ok(SendStats::new(SendMode::Noop));
        }

        let expected = self.width as usize * self.height as usize * 2;
        if frame.len() != expected {
            return Err(EngineError::InvalidArgument(format!(
                "frame length {} does not match {}x{} RGB565 buffer ({} bytes)",
                frame.len(),
                self.width,
                self.height,
                expected
            )));
        }

        let start = Instant::now();
        let mut stats = SendStats::new(SendMode::Dirty);
        let src_stride = self.width as usize * 2;

        for rect in rects {
            let x1 = rect.x + rect.w - 1;
            let y1 = rect.y + rect.h - 1;
            self.set_window(transport, rect.x, rect.y, x1, y1)?;
            stats.bytes_sent += 6;
            stats.packets_sent += 1;

            let rect_stride = rect.w as usize * 2;
            let mut rows: Vec<u8> = Vec::with_capacity(rect.h as usize * rect_stride);
            for row in 0..rect.h {
                let src_start = (rect.y + row) as usize * src_stride + rect.x as usize * 2;
                rows.extend_from_slice(&frame[src_start..src_start + rect_stride]);
            }

            for chunk in rows.chunks(self.chunk_size.max(1)) {
                transport.write(chunk)?;
                stats.bytes_sent += chunk.len() as u64;
                stats.packets_sent += 1;
            }
        }

        stats.duration_s = start.elapsed().as_secs_f64();
        Ok(stats)
    }

    /// Close, briefly wait, reopen and re-handshake on the same port.
    pub fn recover(&mut self, transport: &mut dyn Transport, config: &crate::transport::SerialConfig, clock: &dyn crate::clock::Clock) -> Result<()> {
        transport.close();
        clock.sleep(std::time::Duration::from_millis(200));
        transport.open(config)?;
        self.handshake(transport, DEFAULT_HELLO_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use crate::transport::SerialConfig;

    fn opened(port: &mut FakeTransport) {
        port.open(&SerialConfig::new("fake0")).unwrap();
    }

    #[test]
    fn handshake_happy_path_sets_sub_revision_and_orientation() {
        let mut port = FakeTransport::new();
        opened(&mut port);
        port.queue_read(vec![0x02, 0x02, 0x02, 0x02, 0x02, 0x02]);

        let mut protocol = RevAProtocol::new(800, 480);
        protocol.handshake(&mut port, 500).unwrap();

        assert_eq!(protocol.sub_revision().name, "usbmonitor_5");
        assert_eq!(port.written[0], [Command::Hello as u8; 6]);
        let orientation_payload = &port.written[1];
        assert_eq!(orientation_payload[6], 102);
        assert_eq!(&orientation_payload[7..9], &[0x03, 0x20]);
        assert_eq!(&orientation_payload[9..11], &[0x01, 0xE0]);
    }

    #[test]
    fn hello_accepts_silent_legacy_device() {
        let mut port = FakeTransport::new();
        opened(&mut port);
        // no queued read: FakeTransport::read returns empty on an empty queue.
        let mut protocol = RevAProtocol::new(800, 480);
        protocol.hello(&mut port, 500).unwrap();
        assert_eq!(protocol.sub_revision().name, "unknown");
    }

    #[test]
    fn hello_rejects_malformed_echo() {
        let mut port = FakeTransport::new();
        opened(&mut port);
        port.queue_read(vec![0x01, 0x02, 0x03]);
        let mut protocol = RevAProtocol::new(800, 480);
        assert!(protocol.hello(&mut port, 500).is_err());
    }

    #[test]
    fn full_frame_send_issues_window_then_chunked_writes() {
        let mut port = FakeTransport::new();
        opened(&mut port);
        let protocol = {
            let mut p = RevAProtocol::new(4, 2);
            p.set_chunk_size(4);
            p
        };
        let frame = vec![0xAB; 4 * 2 * 2];
        let stats = protocol.send_frame(&mut port, &frame).unwrap();

        assert_eq!(port.written[0], codec::pack_header(Command::DisplayBitmap, 0, 0, 3, 1).unwrap());
        assert_eq!(port.written.len(), 1 + 4); // window + four 4-byte chunks
        assert_eq!(stats.packets_sent, 5);
        assert_eq!(stats.mode, SendMode::Full);
    }

    #[test]
    fn dirty_rects_empty_list_is_a_noop() {
        let mut port = FakeTransport::new();
        opened(&mut port);
        let protocol = RevAProtocol::new(8, 8);
        let frame = vec![0u8; 8 * 8 * 2];
        let stats = protocol.send_dirty_rects(&mut port, &[], &frame).unwrap();
        assert_eq!(stats.mode, SendMode::Noop);
        assert!(port.written.is_empty());
    }

    #[test]
    fn dirty_rects_copy_correct_rows() {
        let mut port = FakeTransport::new();
        opened(&mut port);
        let protocol = RevAProtocol::new(4, 4);
        let mut frame = vec![0u8; 4 * 4 * 2];
        // mark row 2 distinctly so we can check the copied slice.
        for x in 0..4 {
            frame[2 * 8 + x * 2] = 0x42;
        }
        let rect = DirtyRect::new(0, 2, 4, 1);
        let stats = protocol.send_dirty_rects(&mut port, &[rect], &frame).unwrap();
        assert_eq!(stats.mode, SendMode::Dirty);
        // written[0] is the window header, written[1..] the pixel chunk(s).
        let pixels: Vec<u8> = port.written[1..].concat();
        assert_eq!(pixels, frame[16..24]);
    }
}

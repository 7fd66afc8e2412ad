//! Serial transport for the Unicorn Hybrid Black headset.

use std::io::{Read, Write};
use std::time::Duration;

use log::{debug, warn};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};

use crate::protocol::{
    self, BAUD_RATE, COMMAND_ACK, FRAME_SIZE, START_ACQUISITION, STOP_ACQUISITION,
};
use crate::types::{DeviceError, Sample, SampleSource};

/// Serial read/write timeout. The headset streams continuously, so a
/// read that waits this long means the link is gone.
const SERIAL_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Resync gives up after scanning this many bytes without a header.
const MAX_RESYNC_BYTES: usize = 10 * FRAME_SIZE;

/// A Unicorn headset on a serial port (Bluetooth RFCOMM or USB).
pub struct UnicornDevice {
    port: Box<dyn SerialPort>,
    streaming: bool,
    resync: bool,
    frame: [u8; FRAME_SIZE],
}

impl UnicornDevice {
    /// Open the serial port the headset is bound to.
    ///
    /// With `resync` enabled a malformed frame triggers a bounded scan
    /// for the next frame header instead of an error.
    pub fn open(path: &str, resync: bool) -> Result<Self, DeviceError> {
        let port = serialport::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(SERIAL_TIMEOUT)
            .open()
            .map_err(|e| DeviceError::Transport(format!("failed to open {}: {}", path, e)))?;
        debug!("opened {} at {} baud", path, BAUD_RATE);
        Ok(Self {
            port,
            streaming: false,
            resync,
            frame: [0u8; FRAME_SIZE],
        })
    }

    /// Pick the first serial port that looks like a Unicorn headset.
    ///
    /// The headset pairs as `UN-XXXX.XX.XX`, so its RFCOMM binding or
    /// USB product string carries a `UN` tag.
    pub fn detect_port() -> Result<String, DeviceError> {
        let ports = serialport::available_ports()
            .map_err(|e| DeviceError::Transport(format!("port enumeration failed: {e}")))?;
        for info in &ports {
            let matched = match &info.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .product
                    .as_deref()
                    .map(|p| p.contains("UN"))
                    .unwrap_or(false),
                _ => info.port_name.contains("UN"),
            };
            if matched {
                return Ok(info.port_name.clone());
            }
        }
        let names: Vec<&str> = ports.iter().map(|p| p.port_name.as_str()).collect();
        Err(DeviceError::HardwareNotFound(format!(
            "no Unicorn port among {:?}",
            names
        )))
    }

    fn send_command(&mut self, command: &[u8; 3], what: &str) -> Result<[u8; 3], DeviceError> {
        self.port
            .write_all(command)
            .map_err(|e| DeviceError::Transport(format!("{} command write: {}", what, e)))?;
        self.port
            .flush()
            .map_err(|e| DeviceError::Transport(format!("{} command flush: {}", what, e)))?;
        let mut response = [0u8; 3];
        self.port
            .read_exact(&mut response)
            .map_err(|e| DeviceError::Transport(format!("{} acknowledgement read: {}", what, e)))?;
        Ok(response)
    }

    fn resynchronize(&mut self) -> Result<Sample, DeviceError> {
        scan_to_frame(&mut self.port, &mut self.frame)
    }
}

/// Scan forward through the byte stream for the next frame header,
/// refilling `frame` from `reader` as needed. On success `frame` holds
/// the realigned frame it decoded.
fn scan_to_frame<R: Read>(
    reader: &mut R,
    frame: &mut [u8; FRAME_SIZE],
) -> Result<Sample, DeviceError> {
    let mut scanned = 0usize;
    loop {
        if let Some(start) = protocol::find_frame_start(&frame[..]) {
            if start > 0 {
                frame.copy_within(start.., 0);
                let have = FRAME_SIZE - start;
                reader
                    .read_exact(&mut frame[have..])
                    .map_err(|e| DeviceError::Transport(format!("resync read: {e}")))?;
            }
            debug!("stream resynchronized after {} bytes", scanned + start);
            return protocol::decode_frame(frame);
        }
        scanned += FRAME_SIZE - 1;
        if scanned >= MAX_RESYNC_BYTES {
            return Err(DeviceError::FrameFormat(format!(
                "no frame header within {} bytes",
                MAX_RESYNC_BYTES
            )));
        }
        // Keep the last byte in case a header straddles the refill.
        frame[0] = frame[FRAME_SIZE - 1];
        reader
            .read_exact(&mut frame[1..])
            .map_err(|e| DeviceError::Transport(format!("resync read: {e}")))?;
    }
}

impl SampleSource for UnicornDevice {
    fn start_streaming(&mut self) -> Result<(), DeviceError> {
        if self.streaming {
            return Ok(());
        }
        // Drop whatever is sitting in the OS buffers from a previous run.
        self.port
            .clear(ClearBuffer::All)
            .map_err(|e| DeviceError::Transport(format!("buffer clear: {e}")))?;
        let response = self.send_command(&START_ACQUISITION, "start")?;
        if response != COMMAND_ACK {
            return Err(DeviceError::Transport(format!(
                "start acquisition not acknowledged, got {:02X?}",
                response
            )));
        }
        self.streaming = true;
        debug!("acquisition started");
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Sample, DeviceError> {
        self.port
            .read_exact(&mut self.frame)
            .map_err(|e| DeviceError::Transport(format!("frame read: {e}")))?;
        match protocol::decode_frame(&self.frame) {
            Ok(sample) => Ok(sample),
            Err(err) if self.resync => {
                warn!("{}, scanning for next header", err);
                self.resynchronize()
            }
            Err(err) => Err(err),
        }
    }

    fn stop_streaming(&mut self) -> Result<(), DeviceError> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        let response = self.send_command(&STOP_ACQUISITION, "stop")?;
        // Frames already in flight can arrive ahead of the
        // acknowledgement; treat a mismatch as a warning only.
        if response != COMMAND_ACK {
            warn!("stop acquisition not acknowledged, got {:02X?}", response);
        }
        let _ = self.port.clear(ClearBuffer::Input);
        debug!("acquisition stopped");
        Ok(())
    }
}

impl Drop for UnicornDevice {
    fn drop(&mut self) {
        // Best effort: leave the headset idle even on error paths that
        // skipped the explicit stop.
        if self.streaming {
            debug!("device dropped while streaming, sending stop");
            let _ = self.port.write_all(&STOP_ACQUISITION);
            let _ = self.port.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_frame, EEG_CHANNELS};
    use std::io::Cursor;

    fn wire_frame(counter: u32) -> [u8; FRAME_SIZE] {
        encode_frame(counter, 13, &[0; EEG_CHANNELS], &[0, 0, -4096], &[0; 3])
    }

    #[test]
    fn resync_locks_onto_a_frame_after_leading_garbage() {
        let good = wire_frame(7);
        // What a misaligned read leaves behind: junk, then the start of
        // a frame cut off at the buffer edge.
        let mut frame = [0x55u8; FRAME_SIZE];
        frame[10..].copy_from_slice(&good[..FRAME_SIZE - 10]);
        let mut rest = Cursor::new(good[FRAME_SIZE - 10..].to_vec());
        let sample = scan_to_frame(&mut rest, &mut frame).unwrap();
        assert_eq!(sample.counter, 7);
        assert_eq!(sample.accel[2], -1.0);
    }

    #[test]
    fn resync_catches_a_header_split_across_refills() {
        let good = wire_frame(9);
        // Only the first header byte made it into the scan buffer; the
        // rest of the frame arrives with the next read.
        let mut frame = [0x55u8; FRAME_SIZE];
        frame[FRAME_SIZE - 1] = good[0];
        let mut rest = Cursor::new(good[1..].to_vec());
        let sample = scan_to_frame(&mut rest, &mut frame).unwrap();
        assert_eq!(sample.counter, 9);
    }

    #[test]
    fn resync_gives_up_after_the_scan_bound() {
        let mut frame = [0x55u8; FRAME_SIZE];
        let mut junk = Cursor::new(vec![0x55u8; MAX_RESYNC_BYTES]);
        assert!(matches!(
            scan_to_frame(&mut junk, &mut frame),
            Err(DeviceError::FrameFormat(_))
        ));
    }
}

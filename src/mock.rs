//! Test doubles: a Modbus slave behind the serial traits, plus a
//! hand-cranked clock.
//!
//! [`MockDevice`] is not a canned-response stub; it runs a real RTU slave
//! (`rmodbus::server`) over an in-memory register file, so every test
//! exercises genuine frame generation, CRC checking and response parsing.
//! Failure injection works the way failures look on the wire: the slave
//! swallows its response and the master times out.

use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use fugit::MicrosDurationU32;
use rmodbus::ModbusProto;
use rmodbus::server::ModbusFrame;
use rmodbus::server::storage::ModbusStorageSmall;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSerialError {
    Timeout,
    Broken,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::Timeout => embedded_io::ErrorKind::TimedOut,
            MockSerialError::Broken => embedded_io::ErrorKind::Other,
        }
    }
}

// embedded_io::Error has core::error::Error as a supertrait.
impl core::fmt::Display for MockSerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MockSerialError::Timeout => write!(f, "mock serial timed out"),
            MockSerialError::Broken => write!(f, "mock serial link broken"),
        }
    }
}

impl core::error::Error for MockSerialError {}

/// Manually advanced clock.
///
/// Handles are cheap clones sharing one counter, so a test keeps a handle
/// while the driver owns another. `delay` moves the counter forward instead
/// of sleeping, which makes bus pacing both observable and instant.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    now: Rc<RefCell<u64>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        *self.now.borrow()
    }

    pub fn advance(&self, micros: u64) {
        *self.now.borrow_mut() += micros;
    }
}

impl Clock for MockClock {
    fn now_us(&mut self) -> u64 {
        *self.now.borrow()
    }

    fn delay(&mut self, duration: MicrosDurationU32) {
        *self.now.borrow_mut() += u64::from(duration.to_micros());
    }
}

/// One transaction as seen by the slave, logged even when the response is
/// dropped by failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Read { address: u16, count: u16 },
    Write { address: u16, value: u16 },
}

/// In-memory RTU slave with failure injection.
pub struct MockDevice {
    storage: ModbusStorageSmall,
    request: Vec<u8>,
    response: Vec<u8>,
    log: Vec<BusOp>,
    /// Drop the response to this many upcoming transactions of any kind.
    fail_next: u32,
    /// Drop responses to writes targeting an address: `None` count means
    /// every such write, `Some(n)` only the next `n`.
    fail_writes: Option<(u16, Option<u32>)>,
    /// Same, for reads whose register range covers the address.
    fail_reads: Option<(u16, Option<u32>)>,
    unit_id: u8,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            storage: ModbusStorageSmall::new(),
            request: Vec::new(),
            response: Vec::new(),
            log: Vec::new(),
            fail_next: 0,
            fail_writes: None,
            fail_reads: None,
            unit_id: 0x01,
        }
    }

    /// Slave address the mock answers at. Defaults to `0x01`.
    pub fn set_unit_id(&mut self, unit_id: u8) {
        self.unit_id = unit_id;
    }

    pub fn storage(&self) -> &ModbusStorageSmall {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut ModbusStorageSmall {
        &mut self.storage
    }

    /// Swallow the response to the next `n` transactions, whatever they are.
    pub fn fail_next(&mut self, n: u32) {
        self.fail_next = n;
    }

    /// Swallow responses to writes addressed at `address`. `count` of `None`
    /// fails them all; `Some(n)` fails only the next `n`, then recovers.
    ///
    /// A failed write is not applied to storage - from the master's side it
    /// is indistinguishable from the frame never arriving.
    pub fn fail_writes_to(&mut self, address: u16, count: Option<u32>) {
        self.fail_writes = Some((address, count));
    }

    /// Swallow responses to reads whose register range covers `address`.
    pub fn fail_reads_to(&mut self, address: u16, count: Option<u32>) {
        self.fail_reads = Some((address, count));
    }

    pub fn ops(&self) -> &[BusOp] {
        &self.log
    }

    pub fn op_count(&self) -> usize {
        self.log.len()
    }

    /// Number of write frames received for `address`, including failed ones.
    pub fn write_attempts(&self, address: u16) -> usize {
        self.log
            .iter()
            .filter(|op| matches!(op, BusOp::Write { address: a, .. } if *a == address))
            .count()
    }

    /// Number of read frames whose range covered `address`, including failed
    /// ones.
    pub fn read_attempts(&self, address: u16) -> usize {
        self.log
            .iter()
            .filter(
                |op| matches!(op, BusOp::Read { address: a, count } if *a <= address && address < *a + *count),
            )
            .count()
    }

    fn take_injected_failure(&mut self, op: BusOp) -> bool {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return true;
        }
        let (slot, hit) = match op {
            BusOp::Write { address, .. } => {
                let hit = matches!(self.fail_writes, Some((target, _)) if target == address);
                (&mut self.fail_writes, hit)
            }
            BusOp::Read { address, count } => {
                let hit = matches!(
                    self.fail_reads,
                    Some((target, _)) if address <= target && target < address + count
                );
                (&mut self.fail_reads, hit)
            }
        };
        if !hit {
            return false;
        }
        match slot {
            Some((_, None)) => true,
            Some((_, Some(remaining))) => {
                if *remaining == 0 {
                    false
                } else {
                    *remaining -= 1;
                    true
                }
            }
            None => false,
        }
    }

    fn process_request(&mut self) -> Result<(), MockSerialError> {
        let request = core::mem::take(&mut self.request);
        if request.len() < 6 {
            return Err(MockSerialError::Broken);
        }

        let address = u16::from_be_bytes([request[2], request[3]]);
        let word = u16::from_be_bytes([request[4], request[5]]);
        let op = match request[1] {
            0x03 => BusOp::Read {
                address,
                count: word,
            },
            _ => BusOp::Write {
                address,
                value: word,
            },
        };
        self.log.push(op);

        if self.take_injected_failure(op) {
            return Err(MockSerialError::Timeout);
        }

        let mut response: heapless::Vec<u8, 256> = heapless::Vec::new();
        let mut frame = ModbusFrame::new(self.unit_id, &request, ModbusProto::Rtu, &mut response);
        frame.parse().map_err(|_| MockSerialError::Broken)?;
        if frame.processing_required {
            let processed = if frame.readonly {
                frame.process_read(&self.storage)
            } else {
                frame.process_write(&mut self.storage)
            };
            processed.map_err(|_| MockSerialError::Broken)?;
        }
        if frame.response_required {
            frame
                .finalize_response()
                .map_err(|_| MockSerialError::Broken)?;
        }
        self.response.extend_from_slice(&response);
        Ok(())
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl embedded_io::ErrorType for MockDevice {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockDevice {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.request.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Read for MockDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.response.is_empty() && !self.request.is_empty() {
            self.process_request()?;
        }
        if self.response.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(self.response.len());
        buf[..n].copy_from_slice(&self.response[..n]);
        self.response.drain(..n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read as _, Write as _};
    use rmodbus::client::ModbusRequest;
    use rmodbus::server::context::ModbusContext;

    #[test]
    fn slave_answers_a_well_formed_read() {
        let mut device = MockDevice::new();
        device.storage_mut().set_holding(0x16, 22873).unwrap();

        let mut req = ModbusRequest::new(0x01, ModbusProto::Rtu);
        let mut frame: heapless::Vec<u8, 64> = heapless::Vec::new();
        req.generate_get_holdings(0x16, 1, &mut frame).unwrap();

        device.write_all(&frame).unwrap();
        let mut buf = [0u8; 64];
        let n = device.read(&mut buf).unwrap();
        let mut words: heapless::Vec<u16, 4> = heapless::Vec::new();
        req.parse_u16(&buf[..n], &mut words).unwrap();
        assert_eq!(words[0], 22873);
        assert_eq!(device.ops(), &[BusOp::Read {
            address: 0x16,
            count: 1
        }]);
    }

    #[test]
    fn injected_write_failure_logs_but_does_not_apply() {
        let mut device = MockDevice::new();
        device.fail_writes_to(0x00, Some(1));

        let mut req = ModbusRequest::new(0x01, ModbusProto::Rtu);
        let mut frame: heapless::Vec<u8, 64> = heapless::Vec::new();
        req.generate_set_holding(0x00, 1234, &mut frame).unwrap();

        device.write_all(&frame).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(device.read(&mut buf), Err(MockSerialError::Timeout));
        assert_eq!(device.storage().get_holding(0x00).unwrap(), 0);
        assert_eq!(device.write_attempts(0x00), 1);

        // The injection count is spent; a retry goes through.
        device.write_all(&frame).unwrap();
        let n = device.read(&mut buf).unwrap();
        req.parse_ok(&buf[..n]).unwrap();
        assert_eq!(device.storage().get_holding(0x00).unwrap(), 1234);
        assert_eq!(device.write_attempts(0x00), 2);
    }

    #[test]
    fn serial_error_maps_to_io_kinds() {
        use embedded_io::Error as _;
        assert_eq!(
            MockSerialError::Timeout.kind(),
            embedded_io::ErrorKind::TimedOut
        );
        assert_eq!(MockSerialError::Broken.kind(), embedded_io::ErrorKind::Other);
        assert_eq!(
            MockSerialError::Timeout.to_string(),
            "mock serial timed out"
        );
    }

    #[test]
    fn clock_handles_share_time() {
        let clock = MockClock::new();
        let mut driver_handle = clock.clone();
        driver_handle.delay(MicrosDurationU32::micros(300));
        clock.advance(100);
        assert_eq!(clock.now(), 400);
        assert_eq!(driver_handle.now_us(), 400);
    }
}

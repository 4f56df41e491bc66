//! Mock implementations for testing.
//!
//! A register-file I2C double with a transaction log, plus an interrupt-line
//! double, so the whole driver can be exercised on the host without
//! hardware. Compiled for `cargo test` and for downstream host tests via the
//! `std` feature.

#![cfg(any(test, feature = "std"))]
#![allow(missing_docs)]

use embassy_time::{Duration, Timer};
use embedded_hal::i2c::{Error as I2cError, ErrorKind, ErrorType};
use embedded_hal_async::i2c::{I2c, Operation};

/// One complete bus transaction as the mock observed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    /// Combined write-then-read: register address, then `len` received bytes.
    WriteRead { reg: u8, len: usize },
    /// Contiguous write: register address, then the payload.
    Write {
        reg: u8,
        data: heapless::Vec<u8, 8>,
    },
}

impl BusOp {
    /// Convenience constructor for write assertions.
    pub fn write(reg: u8, data: &[u8]) -> Self {
        Self::Write {
            reg,
            data: heapless::Vec::from_slice(data).unwrap_or_default(),
        }
    }
}

/// Error type reported by [`MockI2c`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockBusError(pub ErrorKind);

impl I2cError for MockBusError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Register-file mock of the coprocessor's I2C interface.
///
/// Reads and writes hit the `regs` byte array; every completed transaction is
/// appended to `log`. `delay` stalls each transaction (to exercise timeouts
/// and serialization) and `fail_next` fails exactly one transaction with the
/// given kind.
pub struct MockI2c {
    pub regs: [u8; 256],
    pub log: heapless::Vec<BusOp, 32>,
    pub delay: Option<Duration>,
    pub fail_next: Option<ErrorKind>,
}

impl MockI2c {
    pub fn new() -> Self {
        Self {
            regs: [0; 256],
            log: heapless::Vec::new(),
            delay: None,
            fail_next: None,
        }
    }
}

impl Default for MockI2c {
    fn default() -> Self {
        Self::new()
    }
}

impl MockI2c {
    /// Delay / one-shot failure injection, applied once per transaction.
    async fn begin(&mut self) -> Result<(), MockBusError> {
        if let Some(delay) = self.delay {
            Timer::after(delay).await;
        }
        match self.fail_next.take() {
            Some(kind) => Err(MockBusError(kind)),
            None => Ok(()),
        }
    }

    /// Contiguous register write: address byte + payload.
    fn reg_write(&mut self, frame: &[u8]) -> Result<(), MockBusError> {
        let (reg, payload) = match frame.split_first() {
            Some(split) => split,
            None => return Err(MockBusError(ErrorKind::Other)),
        };
        for (offset, byte) in payload.iter().enumerate() {
            self.regs[*reg as usize + offset] = *byte;
        }
        let _ = self.log.push(BusOp::write(*reg, payload));
        Ok(())
    }

    /// Combined write-then-read.
    fn reg_read(&mut self, addr: &[u8], buf: &mut [u8]) -> Result<(), MockBusError> {
        let reg = match addr.first() {
            Some(reg) => *reg,
            None => return Err(MockBusError(ErrorKind::Other)),
        };
        for (offset, slot) in buf.iter_mut().enumerate() {
            *slot = self.regs[reg as usize + offset];
        }
        let _ = self.log.push(BusOp::WriteRead {
            reg,
            len: buf.len(),
        });
        Ok(())
    }
}

impl ErrorType for MockI2c {
    type Error = MockBusError;
}

impl I2c for MockI2c {
    async fn read(&mut self, _address: u8, _read: &mut [u8]) -> Result<(), Self::Error> {
        // The driver always addresses a register first; a bare read is a bug.
        Err(MockBusError(ErrorKind::Other))
    }

    async fn write(&mut self, _address: u8, write: &[u8]) -> Result<(), Self::Error> {
        self.begin().await?;
        self.reg_write(write)
    }

    async fn write_read(
        &mut self,
        _address: u8,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.begin().await?;
        self.reg_read(write, read)
    }

    async fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.begin().await?;
        match operations {
            [Operation::Write(frame)] => self.reg_write(frame),
            [Operation::Write(addr), Operation::Read(buf)] => self.reg_read(addr, buf),
            _ => Err(MockBusError(ErrorKind::Other)),
        }
    }
}

/// Interrupt-line double: yields `edges` falling edges (1 ms apart), then
/// pends forever.
pub struct MockIrq {
    edges: usize,
}

impl MockIrq {
    pub fn new(edges: usize) -> Self {
        Self { edges }
    }
}

impl embedded_hal::digital::ErrorType for MockIrq {
    type Error = core::convert::Infallible;
}

impl embedded_hal_async::digital::Wait for MockIrq {
    async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
        core::future::pending().await
    }

    async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
        core::future::pending().await
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
        core::future::pending().await
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
        if self.edges == 0 {
            core::future::pending::<()>().await;
        }
        self.edges -= 1;
        Timer::after_millis(1).await;
        Ok(())
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
        self.wait_for_falling_edge().await
    }
}

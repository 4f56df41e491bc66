//! Driver error taxonomy.
//!
//! Accessors never retry and never panic; every failure is reported through
//! [`Error`]. Bus-level failures (NACK, arbitration loss, transaction
//! timeout) are collapsed into [`Error::Transport`] with a
//! [`TransportCause`] — the caller may retry the whole accessor if it wants
//! to.

use embedded_hal::i2c::{Error as I2cError, ErrorKind};

/// Why a bus transaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportCause {
    /// The coprocessor did not acknowledge its address or a data byte.
    NoAcknowledge,
    /// Arbitration lost against another master on the shared bus.
    ArbitrationLoss,
    /// Bus-level protocol error (misplaced start/stop).
    Bus,
    /// Peripheral receive/transmit overrun.
    Overrun,
    /// The transaction did not complete within the configured timeout.
    Timeout,
    /// Any other HAL-reported failure.
    Other,
}

impl TransportCause {
    /// Map a HAL error to the cause it represents.
    pub fn from_i2c<E: I2cError>(error: &E) -> Self {
        match error.kind() {
            ErrorKind::NoAcknowledge(_) => Self::NoAcknowledge,
            ErrorKind::ArbitrationLoss => Self::ArbitrationLoss,
            ErrorKind::Bus => Self::Bus,
            ErrorKind::Overrun => Self::Overrun,
            _ => Self::Other,
        }
    }
}

/// Error from any driver operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The bus transaction failed. The exclusion lock has been released; the
    /// next accessor call proceeds normally.
    #[error("i2c transport failure ({0:?})")]
    Transport(TransportCause),
    /// The firmware version was never successfully negotiated; call
    /// [`Rp2040::init`](crate::Rp2040::init) first.
    #[error("firmware version not negotiated")]
    NotInitialized,
    /// Application operation while the coprocessor runs its bootloader, or a
    /// bootloader operation while application firmware is running.
    #[error("operation not valid in the current coprocessor mode")]
    WrongMode,
    /// The negotiated firmware version predates this operation.
    #[error("firmware {actual:#04x} is older than required {required:#04x}")]
    UnsupportedFeature {
        /// Minimum firmware version the operation needs.
        required: u8,
        /// Version the coprocessor actually reported.
        actual: u8,
    },
    /// A parameter is out of range (GPIO pin, LED position, logical unit,
    /// scratch offset).
    #[error("argument out of range")]
    InvalidArgument,
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::NoAcknowledgeSource;

    #[derive(Debug)]
    struct Fake(ErrorKind);
    impl I2cError for Fake {
        fn kind(&self) -> ErrorKind {
            self.0
        }
    }
    impl core::fmt::Display for Fake {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }

    #[test]
    fn hal_error_kinds_map_to_causes() {
        let nack = Fake(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        assert_eq!(TransportCause::from_i2c(&nack), TransportCause::NoAcknowledge);
        let arb = Fake(ErrorKind::ArbitrationLoss);
        assert_eq!(TransportCause::from_i2c(&arb), TransportCause::ArbitrationLoss);
        let bus = Fake(ErrorKind::Bus);
        assert_eq!(TransportCause::from_i2c(&bus), TransportCause::Bus);
        let other = Fake(ErrorKind::Other);
        assert_eq!(TransportCause::from_i2c(&other), TransportCause::Other);
    }

    #[test]
    fn display_names_the_failing_version() {
        let e = Error::UnsupportedFeature {
            required: 0x09,
            actual: 0x02,
        };
        let text = std::format!("{e}");
        assert!(text.contains("0x02"));
        assert!(text.contains("0x09"));
    }
}

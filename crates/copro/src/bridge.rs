//! Interrupt-to-event bridge.
//!
//! The coprocessor pulls its interrupt line low whenever one of the sixteen
//! input pins changes. [`InputBridge::run`] turns that edge into a sequence
//! of per-pin change callbacks:
//!
//! ```text
//! edge → HAL wait (ISR-side signalling) → drain: one 4-byte snapshot read
//!      → one callback per set changed bit, ascending pin index
//! ```
//!
//! The loop alternates between exactly two states: draining one snapshot and
//! waiting for the next edge. A failed drain read is logged and dropped — the
//! next edge re-primes the cycle. Input state that changes and changes back
//! between two drains is unobservable by construction (edge-triggered
//! sampling of level state), not an error.
//!
//! Wrap `run` in an executor task next to your other device users; the bridge
//! only ever holds a shared reference to the device handle:
//!
//! ```no_run
//! # async fn spawn<I2C: embedded_hal_async::i2c::I2c,
//! #                IRQ: embedded_hal_async::digital::Wait>(
//! #     device: &rp2040_copro::Rp2040<I2C>, irq: IRQ) -> ! {
//! let bridge = rp2040_copro::InputBridge::new(device, irq);
//! bridge
//!     .run(|event| {
//!         if let Some(id) = event.id() {
//!             let _ = (id, event.level);
//!         }
//!     })
//!     .await
//! # }
//! ```

use embedded_hal_async::digital::Wait;
use embedded_hal_async::i2c::I2c;

use crate::device::Rp2040;

/// Number of input pins covered by the combined snapshot register.
pub const INPUT_PIN_COUNT: u8 = 16;

/// One input pin change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InputEvent {
    /// Pin index, `0..16`.
    pub pin: u8,
    /// Level after the change.
    pub level: bool,
}

impl InputEvent {
    /// The board-level meaning of this pin, if it has one.
    #[must_use]
    pub fn id(&self) -> Option<InputId> {
        InputId::from_index(self.pin)
    }
}

/// Board-level input assignments of the snapshot pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum InputId {
    /// Home button.
    Home = 0,
    /// Menu button.
    Menu = 1,
    /// Start button.
    Start = 2,
    /// Accept button.
    Accept = 3,
    /// Back button.
    Back = 4,
    /// FPGA configuration-done line.
    FpgaCdone = 5,
    /// Battery charger status line.
    BatteryCharging = 6,
    /// Select button.
    Select = 7,
    /// Joystick left contact.
    JoystickLeft = 8,
    /// Joystick centre press.
    JoystickPress = 9,
    /// Joystick down contact.
    JoystickDown = 10,
    /// Joystick up contact.
    JoystickUp = 11,
    /// Joystick right contact.
    JoystickRight = 12,
}

impl InputId {
    /// Map a snapshot pin index to its board assignment.
    #[must_use]
    pub fn from_index(pin: u8) -> Option<Self> {
        Some(match pin {
            0 => Self::Home,
            1 => Self::Menu,
            2 => Self::Start,
            3 => Self::Accept,
            4 => Self::Back,
            5 => Self::FpgaCdone,
            6 => Self::BatteryCharging,
            7 => Self::Select,
            8 => Self::JoystickLeft,
            9 => Self::JoystickPress,
            10 => Self::JoystickDown,
            11 => Self::JoystickUp,
            12 => Self::JoystickRight,
            _ => return None,
        })
    }
}

/// Emit one [`InputEvent`] per set changed bit, ascending pin index.
///
/// `snapshot` layout matches the combined register: current levels in the low
/// 16 bits, changed mask in the high 16 bits.
fn dispatch_snapshot(snapshot: u32, emit: &mut impl FnMut(InputEvent)) {
    let changed = (snapshot >> 16) as u16;
    let levels = (snapshot & 0xFFFF) as u16;
    for pin in 0..INPUT_PIN_COUNT {
        if (changed >> pin) & 0x01 == 0x01 {
            emit(InputEvent {
                pin,
                level: (levels >> pin) & 0x01 == 0x01,
            });
        }
    }
}

/// Per-device input change notifier.
///
/// Holds a shared reference to the device handle for its lifetime and the
/// interrupt-line input. The HAL's [`Wait`] implementation provides the
/// minimal ISR-side signalling (embassy's `ExtiInput` for instance); nothing
/// in this crate runs in interrupt context.
pub struct InputBridge<'d, I2C, IRQ> {
    device: &'d Rp2040<I2C>,
    irq: IRQ,
}

impl<'d, I2C, IRQ> InputBridge<'d, I2C, IRQ>
where
    I2C: I2c,
    IRQ: Wait,
{
    /// Bind the bridge to a device handle and its interrupt line. The line is
    /// open-drain on the coprocessor side; configure it with a pull-up and
    /// watch for falling edges.
    pub fn new(device: &'d Rp2040<I2C>, irq: IRQ) -> Self {
        Self { device, irq }
    }

    /// Drive the bridge forever.
    ///
    /// Drains once before the first wait, so changes that happened before the
    /// task started are delivered immediately. Runs for the lifetime of the
    /// device handle; drop the owning task to tear it down.
    pub async fn run<F>(mut self, mut on_change: F) -> !
    where
        F: FnMut(InputEvent),
    {
        loop {
            match self.device.read_input_snapshot().await {
                Ok(snapshot) => dispatch_snapshot(snapshot, &mut on_change),
                Err(_e) => {
                    // Dropped wake-up; the next edge re-primes the cycle.
                    #[cfg(feature = "defmt")]
                    defmt::warn!("input drain read failed: {}", _e);
                }
            }
            if self.irq.wait_for_falling_edge().await.is_err() {
                #[cfg(feature = "defmt")]
                defmt::warn!("interrupt line wait failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::Config;
    use crate::mocks::{MockI2c, MockIrq};
    use crate::regs;
    use embassy_futures::select::{select, Either};
    use embassy_time::Timer;
    use embedded_hal::i2c::ErrorKind;

    fn snapshot(changed: u16, levels: u16) -> [u8; 4] {
        let raw = (u32::from(changed) << 16) | u32::from(levels);
        raw.to_le_bytes()
    }

    #[test]
    fn dispatch_emits_ascending_per_changed_bit() {
        let mut events = Vec::new();
        let raw = (0b0000_0000_0000_0101_u32 << 16) | 0b0000_0000_0000_0001;
        dispatch_snapshot(raw, &mut |ev: InputEvent| events.push((ev.pin, ev.level)));
        assert_eq!(events, vec![(0, true), (2, false)]);
    }

    #[test]
    fn dispatch_ignores_unchanged_bits() {
        let mut events = Vec::new();
        // All levels high, nothing changed.
        dispatch_snapshot(0x0000_FFFF, &mut |ev: InputEvent| {
            events.push((ev.pin, ev.level));
        });
        assert!(events.is_empty());
    }

    #[test]
    fn input_ids_cover_the_board_map() {
        assert_eq!(InputId::from_index(0), Some(InputId::Home));
        assert_eq!(InputId::from_index(7), Some(InputId::Select));
        assert_eq!(InputId::from_index(12), Some(InputId::JoystickRight));
        assert_eq!(InputId::from_index(13), None);
        assert_eq!(
            InputEvent { pin: 6, level: true }.id(),
            Some(InputId::BatteryCharging)
        );
    }

    async fn ready_device(input: [u8; 4]) -> Rp2040<MockI2c> {
        let mut bus = MockI2c::new();
        bus.regs[regs::REG_FW_VER as usize] = 0x10;
        bus.regs[regs::REG_INPUT1 as usize..regs::REG_INPUT1 as usize + 4]
            .copy_from_slice(&input);
        let device = Rp2040::new(bus, Config::default());
        device.init().await.unwrap();
        device
    }

    #[tokio::test]
    async fn priming_drain_fires_before_the_first_edge() {
        let device = ready_device(snapshot(0b101, 0b001)).await;
        let mut events = Vec::new();

        let bridge = InputBridge::new(&device, MockIrq::new(0));
        let run = bridge.run(|ev| events.push((ev.pin, ev.level)));
        match select(run, Timer::after_millis(20)).await {
            Either::First(_) => {}
            Either::Second(()) => {}
        }

        // No edge ever arrived, yet the priming drain delivered the snapshot
        // exactly once, in ascending pin order.
        assert_eq!(events, vec![(0, true), (2, false)]);
    }

    #[tokio::test]
    async fn failed_drain_is_dropped_and_the_next_edge_recovers() {
        let mut device = ready_device(snapshot(0b10, 0b10)).await;
        device.bus_mut().fail_next = Some(ErrorKind::Bus);
        let mut events = Vec::new();

        let bridge = InputBridge::new(&device, MockIrq::new(1));
        let run = bridge.run(|ev| events.push((ev.pin, ev.level)));
        match select(run, Timer::after_millis(20)).await {
            Either::First(_) => {}
            Either::Second(()) => {}
        }

        // Priming drain failed silently; the single edge drained once.
        assert_eq!(events, vec![(1, true)]);
    }
}

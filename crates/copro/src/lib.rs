//! Async driver for the RP2040 I/O coprocessor on the badge mainboard.
//!
//! The coprocessor sits on the shared I2C bus and exposes a byte-addressed
//! register map covering GPIO, LCD backlight, battery/USB ADC channels,
//! bootloader control, IR transmit, the WS2812 strip and the USB mass-storage
//! geometry. A dedicated interrupt line falls whenever one of the sixteen
//! input pins (buttons, joystick, charger status, FPGA CDONE) changes state.
//!
//! # Architecture
//!
//! ```text
//! Application tasks ──┐
//!                     ├── Rp2040<I2C>  (accessors, capability gate)
//! InputBridge task ───┘        ↓
//!                      Mutex<…, bus + shadow state>
//!                              ↓
//!                      embedded_hal_async::i2c::I2c
//! ```
//!
//! Every register transaction and every shadow-byte mutation happens inside
//! one mutex critical section, so accessor calls from independent tasks and
//! the bridge's own drain reads never interleave on the bus.
//!
//! # Firmware capability gating
//!
//! The coprocessor firmware grew features over time; each accessor declares
//! the minimum application-firmware version it needs. Version `0xFF` is a
//! sentinel meaning the coprocessor is running its bootloader, which enables
//! a disjoint set of operations. The version must be negotiated once via
//! [`Rp2040::init`] before any feature accessor will touch the bus.
//!
//! # Example
//!
//! ```no_run
//! use rp2040_copro::{Config, InputBridge, Rp2040};
//!
//! async fn bring_up<I2C, IRQ>(bus: I2C, irq: IRQ) -> Result<(), rp2040_copro::Error>
//! where
//!     I2C: embedded_hal_async::i2c::I2c,
//!     IRQ: embedded_hal_async::digital::Wait,
//! {
//!     let device = Rp2040::new(bus, Config::default());
//!     device.init().await?;
//!     device.set_backlight(128).await?;
//!
//!     let bridge = InputBridge::new(&device, irq);
//!     bridge
//!         .run(|event| {
//!             // one callback per changed pin, ascending pin index
//!             let _ = (event.pin, event.level);
//!         })
//!         .await
//! }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in driver code
#![deny(clippy::expect_used)] // no .expect() in driver code
#![deny(clippy::panic)] // no panic!() in driver code
#![deny(unused_must_use)]
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::doc_markdown)] // hex addresses and register names in doc comments
#![allow(clippy::missing_errors_doc)]

pub mod bridge;
pub mod device;
pub mod error;
pub mod mocks;
pub mod regs;

pub use bridge::{InputBridge, InputEvent, InputId};
pub use device::{Config, Rp2040};
pub use error::{Error, TransportCause};

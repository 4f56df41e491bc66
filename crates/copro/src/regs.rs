//! RP2040 coprocessor register map and wire-format constants.
//!
//! Addresses are fixed by the coprocessor firmware; the tests at the bottom
//! pin them against the published map. All multi-byte registers are
//! little-endian on the wire.

/// 7-bit I2C address of the coprocessor.
pub const DEFAULT_ADDRESS: u8 = 0x17;

/// Firmware version (1 byte). `0xFF` means the bootloader is running.
pub const REG_FW_VER: u8 = 0;
/// GPIO direction bits (1 byte, shadow-merged, 1 = output).
pub const REG_GPIO_DIR: u8 = 1;
/// GPIO input levels (1 byte, read-only).
pub const REG_GPIO_IN: u8 = 2;
/// GPIO output levels (1 byte, shadow-merged).
pub const REG_GPIO_OUT: u8 = 3;
/// LCD backlight brightness (1 byte).
pub const REG_LCD_BACKLIGHT: u8 = 4;
/// FPGA control flags (1 byte, see [`FPGA_ENABLE`] / [`FPGA_LOOPBACK`]).
pub const REG_FPGA: u8 = 5;
/// Current input levels, low byte. Reading 4 bytes from here returns the
/// combined levels (low 16 bits) + changed mask (high 16 bits) snapshot.
pub const REG_INPUT1: u8 = 6;
/// Current input levels, high byte.
pub const REG_INPUT2: u8 = 7;
/// Changed-since-last-read mask, low byte.
pub const REG_INTERRUPT1: u8 = 8;
/// Changed-since-last-read mask, high byte.
pub const REG_INTERRUPT2: u8 = 9;
/// ADC conversion trigger (1 byte).
pub const REG_ADC_TRIGGER: u8 = 10;
/// USB supply voltage, raw 12-bit ADC value, low byte.
pub const REG_ADC_VALUE_VUSB_LO: u8 = 11;
/// USB supply voltage, high byte.
pub const REG_ADC_VALUE_VUSB_HI: u8 = 12;
/// Battery voltage, raw 12-bit ADC value, low byte.
pub const REG_ADC_VALUE_VBAT_LO: u8 = 13;
/// Battery voltage, high byte.
pub const REG_ADC_VALUE_VBAT_HI: u8 = 14;
/// USB connection state (1 byte).
pub const REG_USB: u8 = 15;
/// Reboot-to-bootloader trigger; write [`REBOOT_TO_BOOTLOADER_MAGIC`].
pub const REG_BL_TRIGGER: u8 = 16;
/// WebUSB mode (1 byte).
pub const REG_WEBUSB_MODE: u8 = 17;
/// Crash / debug state (1 byte).
pub const REG_CRASH_DEBUG: u8 = 18;
/// Reset-loop protection lock (1 byte).
pub const REG_RESET_LOCK: u8 = 19;
/// Reset-attempted flag (1 byte).
pub const REG_RESET_ATTEMPTED: u8 = 20;
/// Battery charging state (1 byte).
pub const REG_CHARGING_STATE: u8 = 21;
/// Internal temperature sensor, raw 12-bit ADC value, low byte.
pub const REG_ADC_VALUE_TEMP_LO: u8 = 22;
/// Internal temperature sensor, high byte.
pub const REG_ADC_VALUE_TEMP_HI: u8 = 23;
/// Unique board identifier, 8 contiguous bytes.
pub const REG_UID0: u8 = 24;
/// Scratch register bank, [`SCRATCH_LEN`] contiguous bytes. Used for boot
/// parameters and freely readable/writable from WebUSB.
pub const REG_SCRATCH0: u8 = 32;
/// IR transmit address, low byte (start of the 4-byte transmit block).
pub const REG_IR_ADDRESS_LO: u8 = 96;
/// IR transmit address, high byte.
pub const REG_IR_ADDRESS_HI: u8 = 97;
/// IR transmit command byte.
pub const REG_IR_COMMAND: u8 = 98;
/// IR transmit trigger; non-zero starts transmission.
pub const REG_IR_TRIGGER: u8 = 99;

// Registers 100-103 are reserved.

/// WS2812 strip mode (1 byte).
pub const REG_WS2812_MODE: u8 = 104;
/// WS2812 latch trigger (1 byte).
pub const REG_WS2812_TRIGGER: u8 = 105;
/// WS2812 strip length (1 byte).
pub const REG_WS2812_LENGTH: u8 = 106;
/// WS2812 animation speed (1 byte).
pub const REG_WS2812_SPEED: u8 = 107;
/// Per-LED colour data, 4 bytes per LED, [`WS2812_MAX_LEDS`] LEDs.
pub const REG_WS2812_LED0_DATA0: u8 = 108;

/// Mass-storage LUN 0 block count (4 bytes).
pub const REG_MSC0_BLOCK_COUNT_LO_A: u8 = 148;
/// Mass-storage LUN 0 block size (2 bytes).
pub const REG_MSC0_BLOCK_SIZE_LO: u8 = 152;
/// Mass-storage LUN 1 block count (4 bytes).
pub const REG_MSC1_BLOCK_COUNT_LO_A: u8 = 154;
/// Mass-storage LUN 1 block size (2 bytes).
pub const REG_MSC1_BLOCK_SIZE_LO: u8 = 158;
/// Mass-storage control (1 byte).
pub const REG_MSC_CONTROL: u8 = 160;
/// Mass-storage state (1 byte, read-only).
pub const REG_MSC_STATE: u8 = 161;

/// Bootloader-mode register map (active while [`REG_FW_VER`] reads `0xFF`).
pub mod bootloader {
    /// Application firmware version (same address as the application map).
    pub const REG_FW_VER: u8 = 0;
    /// Bootloader version (1 byte).
    pub const REG_BL_VER: u8 = 1;
    /// Bootloader state (1 byte).
    pub const REG_BL_STATE: u8 = 2;
    /// Bootloader control action (1 byte, write).
    pub const REG_BL_CTRL: u8 = 3;
}

/// [`REG_FPGA`] flag: hold the FPGA out of reset.
pub const FPGA_ENABLE: u8 = 0x01;
/// [`REG_FPGA`] flag: route the FPGA UART back to the host (loopback test).
pub const FPGA_LOOPBACK: u8 = 0x02;

/// Firmware-version sentinel: the coprocessor is running its bootloader.
pub const FW_BOOTLOADER: u8 = 0xFF;
/// Value written to [`REG_BL_TRIGGER`] to reboot into the bootloader.
pub const REBOOT_TO_BOOTLOADER_MAGIC: u8 = 0xBE;

/// Baseline firmware for GPIO, backlight, FPGA, UID, USB state, buttons.
pub const MIN_VER_BASE: u8 = 0x01;
/// ADC channels, charging state and WebUSB mode readback.
pub const MIN_VER_ADC: u8 = 0x02;
/// Crash diagnostics and IR transmit.
pub const MIN_VER_CRASH_IR: u8 = 0x06;
/// Reset-loop protection registers.
pub const MIN_VER_RESET_PROTECT: u8 = 0x08;
/// WS2812 strip control.
pub const MIN_VER_WS2812: u8 = 0x09;
/// Mass-storage emulation geometry.
pub const MIN_VER_MSC: u8 = 0x0D;
/// Leaving WebUSB mode from the host side.
pub const MIN_VER_WEBUSB_EXIT: u8 = 0x0E;

/// Number of addressable LEDs on the strip.
pub const WS2812_MAX_LEDS: u8 = 10;
/// Number of scratch registers.
pub const SCRATCH_LEN: u8 = 64;
/// Number of coprocessor GPIO lines (one shadow byte each for direction and
/// output level).
pub const GPIO_COUNT: u8 = 8;

/// Volts per ADC count: 12-bit conversion against the 3.3 V reference.
pub const ADC_VOLTS_PER_COUNT: f32 = 3.3 / 4096.0;
/// Both supply channels are measured through a 100k/100k resistive divider.
pub const ADC_DIVIDER_RATIO: f32 = 2.0;

/// Convert a raw supply-channel ADC reading to volts, compensating for the
/// external divider.
#[inline]
#[must_use]
pub fn adc_to_volts(raw: u16) -> f32 {
    f32::from(raw) * ADC_VOLTS_PER_COUNT * ADC_DIVIDER_RATIO
}

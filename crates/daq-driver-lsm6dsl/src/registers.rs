//! LSM6DSL register map and the configuration sequence applied at startup.
//!
//! The addresses and values are the sensor's external protocol; they are
//! reproduced from the datasheet, not derived.

/// Identity register.
pub const WHO_AM_I: u8 = 0x0F;
/// Expected WHO_AM_I answer.
pub const WHO_AM_I_VALUE: u8 = 0x6A;

/// INT2 pin routing.
pub const INT2_CTRL: u8 = 0x0E;

/// Accelerometer ODR and full scale.
pub const CTRL1_XL: u8 = 0x10;
/// Gyroscope ODR and full scale.
pub const CTRL2_G: u8 = 0x11;
/// Block data update, auto-increment, software reset.
pub const CTRL3_C: u8 = 0x12;
/// I2C disable, DRDY mask.
pub const CTRL4_C: u8 = 0x13;
/// Accelerometer filtering.
pub const CTRL8_XL: u8 = 0x17;
/// Accelerometer axis enables.
pub const CTRL9_XL: u8 = 0x18;
/// Gyroscope axis enables.
pub const CTRL10_C: u8 = 0x19;

/// FIFO threshold, low byte.
pub const FIFO_CTRL1: u8 = 0x06;
/// FIFO threshold, high bits.
pub const FIFO_CTRL2: u8 = 0x07;
/// Gyro and accel FIFO decimation.
pub const FIFO_CTRL3: u8 = 0x08;
/// Third and fourth FIFO data sets.
pub const FIFO_CTRL4: u8 = 0x09;
/// FIFO ODR and mode.
pub const FIFO_CTRL5: u8 = 0x0A;

/// Unread word count, low byte.
pub const FIFO_STATUS1: u8 = 0x3A;
/// Unread word count, high nibble, plus watermark / overrun / empty flags.
pub const FIFO_STATUS2: u8 = 0x3B;
/// FIFO pattern, low byte.
pub const FIFO_STATUS3: u8 = 0x3C;
/// FIFO pattern, high bits.
pub const FIFO_STATUS4: u8 = 0x3D;

/// FIFO output, low byte. Burst reads from here drain the FIFO.
pub const FIFO_DATA_OUT_L: u8 = 0x3E;

/// Set on the address byte of a read transaction.
pub const READ_FLAG: u8 = 0x80;

/// Software reset bit in CTRL3_C.
pub const CTRL3_C_SW_RESET: u8 = 0x01;

/// Register writes applied after the software reset, in order.
///
/// 833 Hz ODR on both sensors, ±16 g / 2000 dps, block data update with
/// auto-increment, gyro+accel FIFO in continuous mode, FIFO threshold
/// interrupt on INT2.
pub const CONFIG_SEQUENCE: &[(u8, u8)] = &[
    (CTRL1_XL, 0x77),
    (CTRL8_XL, 0xC8),
    (CTRL2_G, 0x7C),
    (CTRL3_C, 0x44),
    (CTRL4_C, 0x04),
    (CTRL9_XL, 0x38),
    (CTRL10_C, 0x38),
    (FIFO_CTRL1, 0x80),
    (FIFO_CTRL2, 0x07),
    (FIFO_CTRL3, 0x09),
    (FIFO_CTRL4, 0x00),
    (FIFO_CTRL5, 0x3E),
    (INT2_CTRL, 0x08),
];

/// Accelerometer sensitivity in g per LSB.
pub const ACCEL_SENSITIVITY_G: f64 = 0.000488;

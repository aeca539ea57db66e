//! Decagon sensor reply parser
//!
//! A reply is ASCII fields separated by spaces, then CR, a one-byte sensor
//! family discriminator, a checksum character and CR LF. Fields are
//! converted walking backwards from the CR, so the last field is read
//! first. Every walk stops at index 0.

/// Carriage return, ends the value fields
pub const CR: u8 = 0x0D;
/// Line feed, ends the reply
pub const LF: u8 = 0x0A;
const SPACE: u8 = b' ';
const MINUS: u8 = b'-';
const POINT: u8 = b'.';

/// Sensor families, keyed by their discriminator byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SensorFamily {
    /// Water potential and temperature, both with decimals
    Mps6 = b'l',
    /// Dielectric, a one-character field, temperature
    FiveTm = b'x',
    /// Dielectric, conductivity, temperature
    FiveTe = b'z',
}

impl SensorFamily {
    /// Family for a discriminator byte, `None` if unrecognised
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'l' => Some(Self::Mps6),
            b'x' => Some(Self::FiveTm),
            b'z' => Some(Self::FiveTe),
            _ => None,
        }
    }
}

/// Result of a checksum test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChecksumStatus {
    Pass = 0,
    Fail = 1,
}

/// One parsed sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorReading {
    /// Tenths of a degree where the sensor reports a decimal.
    /// Fields beyond the `i16` range saturate.
    pub temperature: i16,
    /// Raw dielectric count, or water potential in tenths of a kPa (MPS6)
    pub soil_moisture: i32,
}

/// Checksum character over `bytes`: their sum mod 64, plus 32
pub fn checksum_char(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32));
    (sum % 64) as u8 + 32
}

/// Verify the checksum character that follows the discriminator
///
/// The sum runs from the first byte through the first CR found after it
/// and includes the discriminator.
pub fn test_checksum(buf: &[u8]) -> ChecksumStatus {
    let Some(cr) = buf.iter().skip(1).position(|&b| b == CR).map(|i| i + 1) else {
        return ChecksumStatus::Fail;
    };

    match (buf.get(cr + 1), buf.get(cr + 2)) {
        (Some(_), Some(&expected)) if checksum_char(&buf[..cr + 2]) == expected => {
            ChecksumStatus::Pass
        }
        _ => ChecksumStatus::Fail,
    }
}

/// Discriminator byte following the first CR
pub fn discriminator(buf: &[u8]) -> Option<u8> {
    let cr = buf.iter().position(|&b| b == CR)?;
    buf.get(cr + 1).copied()
}

/// Parse a reply. `None` if the family is not recognised.
pub fn parse_reading(buf: &[u8]) -> Option<SensorReading> {
    let cr = buf.iter().position(|&b| b == CR)?;
    let family = SensorFamily::from_byte(*buf.get(cr + 1)?)?;

    let reading = match family {
        SensorFamily::FiveTm => parse_5tm(buf, cr),
        SensorFamily::FiveTe => parse_5te(buf, cr),
        SensorFamily::Mps6 => parse_mps6(buf, cr),
    };
    Some(reading)
}

/// Decimal accumulated from the least significant digit up
struct Backward {
    value: i32,
    mult: i32,
}

impl Backward {
    fn new() -> Self {
        Self { value: 0, mult: 1 }
    }

    fn push(&mut self, ascii: u8) {
        let digit = ascii as i32 - b'0' as i32;
        self.value = self.value.wrapping_add(digit.wrapping_mul(self.mult));
        self.mult = self.mult.wrapping_mul(10);
    }
}

/// Clamp an accumulated field into the temperature range
fn clamp_temperature(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Last field before `end`, plus the index of the space that bounds it.
/// Index 0 is never taken as a digit.
fn trailing_field(buf: &[u8], end: usize) -> (Backward, usize) {
    let mut field = Backward::new();
    let mut i = end;
    while i > 0 {
        i -= 1;
        if buf[i] == SPACE || i == 0 {
            break;
        }
        field.push(buf[i]);
    }
    (field, i)
}

/// Every byte before `end`, down to and including index 0
fn leading_field(buf: &[u8], end: usize) -> Backward {
    let mut field = Backward::new();
    let mut i = end;
    while i != 0 {
        i -= 1;
        field.push(buf[i]);
    }
    field
}

fn parse_5tm(buf: &[u8], cr: usize) -> SensorReading {
    let (temperature, space) = trailing_field(buf, cr);
    // Skip the separator and the one-character middle field
    let soil = leading_field(buf, space.saturating_sub(2));

    SensorReading {
        temperature: clamp_temperature(temperature.value),
        soil_moisture: soil.value,
    }
}

fn parse_5te(buf: &[u8], cr: usize) -> SensorReading {
    let (temperature, space) = trailing_field(buf, cr);

    // Back over the conductivity field to the space before it
    let mut i = space;
    while i > 0 {
        i -= 1;
        if buf[i] == SPACE {
            break;
        }
    }
    let soil = leading_field(buf, i);

    SensorReading {
        temperature: clamp_temperature(temperature.value),
        soil_moisture: soil.value,
    }
}

fn parse_mps6(buf: &[u8], cr: usize) -> SensorReading {
    let mut temperature = Backward::new();
    let mut negative = false;
    let mut i = cr;
    while i > 0 {
        i -= 1;
        if buf[i] == SPACE || i == 0 {
            break;
        }
        match buf[i] {
            POINT => {}
            MINUS => negative = true,
            b => temperature.push(b),
        }
    }
    if negative {
        temperature.value = temperature.value.wrapping_neg();
    }

    // Water potential is always negative; read back to its sign
    let mut soil = Backward::new();
    while i > 0 {
        i -= 1;
        match buf[i] {
            MINUS => break,
            POINT => {}
            b => soil.push(b),
        }
    }

    SensorReading {
        temperature: clamp_temperature(temperature.value),
        soil_moisture: soil.value.wrapping_neg(),
    }
}

use crc::{Crc, CRC_16_MODBUS};
use thiserror::Error;
use tracing::debug;
use types::{Metric, MetricValue};
use uuid::Uuid;

/// Notification/write characteristic exposed by the controller's BLE UART bridge.
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

pub const BATTERY_QUERY: [u8; 8] = [0x01, 0x03, 0x01, 0x01, 0x00, 0x03, 0x55, 0xF7];
pub const LOAD_QUERY: [u8; 8] = [0x01, 0x03, 0x01, 0x04, 0x00, 0x05, 0xC5, 0xF4];
pub const SOLAR_QUERY: [u8; 8] = [0x01, 0x03, 0x01, 0x09, 0x00, 0x07, 0xD5, 0xF6];
pub const LOAD_ON: [u8; 8] = [0x01, 0x06, 0x01, 0x20, 0xFF, 0xFF, 0x88, 0x4C];
pub const LOAD_OFF: [u8; 8] = [0x01, 0x06, 0x01, 0x20, 0x00, 0x00, 0x89, 0xFC];

pub const BATTERY_FRAME_LEN: usize = 11;
pub const LOAD_FRAME_LEN: usize = 15;
pub const SOLAR_FRAME_LEN: usize = 19;

const MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// The fixed outbound commands understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    BatteryQuery,
    LoadQuery,
    SolarQuery,
    LoadOn,
    LoadOff,
}

impl Command {
    /// Queries in the order they are issued each run.
    pub const QUERIES: [Command; 3] = [Command::BatteryQuery, Command::LoadQuery, Command::SolarQuery];

    pub fn bytes(self) -> &'static [u8; 8] {
        match self {
            Command::BatteryQuery => &BATTERY_QUERY,
            Command::LoadQuery => &LOAD_QUERY,
            Command::SolarQuery => &SOLAR_QUERY,
            Command::LoadOn => &LOAD_ON,
            Command::LoadOff => &LOAD_OFF,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Command::BatteryQuery => "battery_query",
            Command::LoadQuery => "load_query",
            Command::SolarQuery => "solar_query",
            Command::LoadOn => "load_on",
            Command::LoadOff => "load_off",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no frame layout for length {0}")]
    UnknownLength(usize),
    #[error("offset {offset} out of bounds for {len}-byte frame")]
    Truncated { offset: usize, len: usize },
}

/// Response shapes, told apart only by their length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFrame<'a> {
    Battery(&'a [u8]),
    Load(&'a [u8]),
    Solar(&'a [u8]),
    Unknown(usize),
}

impl<'a> ResponseFrame<'a> {
    pub fn classify(frame: &'a [u8]) -> Self {
        match frame.len() {
            BATTERY_FRAME_LEN => ResponseFrame::Battery(frame),
            LOAD_FRAME_LEN => ResponseFrame::Load(frame),
            SOLAR_FRAME_LEN => ResponseFrame::Solar(frame),
            len => ResponseFrame::Unknown(len),
        }
    }
}

/// Decodes a response frame into metric updates. Frames that carry no
/// metrics produce an empty list.
pub fn decode(frame: &[u8]) -> Vec<(Metric, MetricValue)> {
    match try_decode(frame) {
        Ok(updates) => updates,
        Err(err) => {
            debug!(len = frame.len(), error = %err, "frame ignored");
            Vec::new()
        }
    }
}

pub fn try_decode(frame: &[u8]) -> Result<Vec<(Metric, MetricValue)>, DecodeError> {
    match ResponseFrame::classify(frame) {
        ResponseFrame::Battery(data) => Ok(vec![
            (Metric::BatteryVoltage, scaled(data, 5, 10.0)?),
            (Metric::BatteryCurrent, scaled(data, 7, 100.0)?),
        ]),
        ResponseFrame::Load(data) => Ok(vec![
            (Metric::BatteryPower, scaled(data, 3, 1.0)?),
            (Metric::LoadVoltage, scaled(data, 7, 10.0)?),
            (Metric::LoadCurrent, scaled(data, 9, 100.0)?),
            (Metric::LoadPower, scaled(data, 11, 1.0)?),
        ]),
        ResponseFrame::Solar(data) => Ok(vec![
            (Metric::SolarVoltage, scaled(data, 3, 10.0)?),
            (Metric::LoadOn, MetricValue::Flag(load_flag(byte(data, 11)?))),
        ]),
        ResponseFrame::Unknown(len) => Err(DecodeError::UnknownLength(len)),
    }
}

/// Load status sits in the high byte of the status word. It is read as
/// `byte / 256 > 0` in real arithmetic, so any nonzero byte is "on".
fn load_flag(status: u8) -> bool {
    f64::from(status) / 256.0 > 0.0
}

fn scaled(frame: &[u8], offset: usize, divisor: f64) -> Result<MetricValue, DecodeError> {
    let raw = word(frame, offset)?;
    Ok(MetricValue::Number(f64::from(raw) / divisor))
}

/// Big-endian register at `offset`, `offset + 1`.
fn word(frame: &[u8], offset: usize) -> Result<u16, DecodeError> {
    let hi = byte(frame, offset)?;
    let lo = byte(frame, offset + 1)?;
    Ok(u16::from_be_bytes([hi, lo]))
}

fn byte(frame: &[u8], offset: usize) -> Result<u8, DecodeError> {
    frame.get(offset).copied().ok_or(DecodeError::Truncated {
        offset,
        len: frame.len(),
    })
}

/// Modbus CRC-16 over `bytes`.
pub fn crc16(bytes: &[u8]) -> u16 {
    MODBUS.checksum(bytes)
}

/// True when the last two bytes hold the CRC of the rest, low byte first.
pub fn has_valid_checksum(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    crc16(body).to_le_bytes() == [tail[0], tail[1]]
}

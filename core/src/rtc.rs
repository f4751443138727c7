//! DS3231 real-time clock access.
//!
//! The chip keeps seconds through year in registers `0x00..=0x06`, each
//! byte binary-coded decimal. Reads and writes always move the whole block
//! so the fields are latched together.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use thiserror::Error;

use crate::hardware::{HardwareError, RegisterBus};

pub const DS3231_I2C_ADDRESS: u16 = 0x68;
pub const DS3231_REG_SECONDS: u8 = 0x00;
pub const DS3231_REG_MINUTES: u8 = 0x01;
pub const DS3231_REG_HOURS: u8 = 0x02;
pub const DS3231_REG_DAY: u8 = 0x03;
pub const DS3231_REG_DATE: u8 = 0x04;
pub const DS3231_REG_MONTH: u8 = 0x05;
pub const DS3231_REG_YEAR: u8 = 0x06;

const BLOCK_LEN: u8 = 7;
const HOUR_MASK: u8 = 0x3F;
const CENTURY: i32 = 2000;

#[derive(Error, Debug)]
pub enum RtcError {
    #[error("Bus Error: {0}")]
    Bus(#[from] HardwareError),
    #[error("Registers do not hold a valid date/time: {0:?}")]
    InvalidDateTime(RtcReading),
    #[error("Year {0} cannot be stored (2000..=2099)")]
    YearOutOfRange(i32),
    #[error("Not supported by {0}")]
    NotSupported(String),
}

pub fn bcd_to_decimal(bcd: u8) -> u8 {
    (bcd & 0x0F) + ((bcd & 0xF0) >> 4) * 10
}

/// Valid for `0..=99`.
pub fn decimal_to_bcd(decimal: u8) -> u8 {
    ((decimal / 10) << 4) | (decimal % 10)
}

/// Calendar fields as decoded from the register block, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcReading {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl RtcReading {
    /// The weekday register is not part of the reading.
    pub fn from_registers(regs: &[u8; 7]) -> Self {
        Self {
            second: bcd_to_decimal(regs[DS3231_REG_SECONDS as usize]),
            minute: bcd_to_decimal(regs[DS3231_REG_MINUTES as usize]),
            hour: bcd_to_decimal(regs[DS3231_REG_HOURS as usize] & HOUR_MASK),
            day: bcd_to_decimal(regs[DS3231_REG_DATE as usize]),
            month: bcd_to_decimal(regs[DS3231_REG_MONTH as usize]),
            year: bcd_to_decimal(regs[DS3231_REG_YEAR as usize]) as u16 + CENTURY as u16,
        }
    }

    pub fn to_datetime(&self) -> Result<NaiveDateTime, RtcError> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)
            .and_then(|d| d.and_hms_opt(self.hour as u32, self.minute as u32, self.second as u32))
            .ok_or(RtcError::InvalidDateTime(*self))
    }
}

/// Encodes `dt` into the seven timekeeping registers, weekday 1 = Monday.
pub fn encode_registers(dt: &NaiveDateTime) -> Result<[u8; 7], RtcError> {
    let offset = dt.year() - CENTURY;
    if !(0..=99).contains(&offset) {
        return Err(RtcError::YearOutOfRange(dt.year()));
    }

    Ok([
        decimal_to_bcd(dt.second() as u8),
        decimal_to_bcd(dt.minute() as u8),
        decimal_to_bcd(dt.hour() as u8),
        decimal_to_bcd(dt.weekday().num_days_from_monday() as u8 + 1),
        decimal_to_bcd(dt.day() as u8),
        decimal_to_bcd(dt.month() as u8),
        decimal_to_bcd(offset as u8),
    ])
}

pub trait Clock {
    fn read_datetime(&mut self) -> Result<NaiveDateTime, RtcError>;
    fn set_datetime(&mut self, dt: &NaiveDateTime) -> Result<(), RtcError>;
    fn name(&self) -> &str;
}

pub struct Ds3231<B> {
    bus: B,
}

impl<B: RegisterBus> Ds3231<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn read_registers(&mut self) -> Result<[u8; 7], RtcError> {
        let data = self.bus.read_block(DS3231_REG_SECONDS, BLOCK_LEN)?;
        let regs: [u8; 7] = data
            .get(..BLOCK_LEN as usize)
            .and_then(|s| s.try_into().ok())
            .ok_or(HardwareError::ShortRead {
                register: DS3231_REG_SECONDS,
                expected: BLOCK_LEN as usize,
                got: data.len(),
            })?;
        Ok(regs)
    }

    pub fn into_inner(self) -> B {
        self.bus
    }
}

impl<B: RegisterBus> Clock for Ds3231<B> {
    fn read_datetime(&mut self) -> Result<NaiveDateTime, RtcError> {
        let regs = self.read_registers()?;
        RtcReading::from_registers(&regs).to_datetime()
    }

    fn set_datetime(&mut self, dt: &NaiveDateTime) -> Result<(), RtcError> {
        let regs = encode_registers(dt)?;
        self.bus.write_block(DS3231_REG_SECONDS, &regs)?;
        Ok(())
    }

    fn name(&self) -> &str {
        self.bus.name()
    }
}

/// Host wall clock, for runs without the RTC fitted.
pub struct SystemClock;

impl Clock for SystemClock {
    fn read_datetime(&mut self) -> Result<NaiveDateTime, RtcError> {
        let now = Local::now().naive_local();
        Ok(now.with_nanosecond(0).unwrap_or(now))
    }

    fn set_datetime(&mut self, _dt: &NaiveDateTime) -> Result<(), RtcError> {
        Err(RtcError::NotSupported(self.name().to_string()))
    }

    fn name(&self) -> &str {
        "System clock"
    }
}

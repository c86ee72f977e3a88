//! Binary time tags: CP56Time2a, CP24Time2a and CP16Time2a.
//!
//! Time tags keep their encoded bytes so reserved bits survive a decode and
//! re-encode unchanged. Typed constructors validate calendar ranges.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};

use crate::error::{Iec60870Error, Result};

fn check_range(name: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if value < min || value > max {
        return Err(Iec60870Error::domain(format!(
            "{} {} outside {}..={}",
            name, value, min, max
        )));
    }
    Ok(())
}

/// Seven octet binary time (CP56Time2a).
///
/// Byte layout:
/// - 0-1: milliseconds within the minute (0-59999), little-endian
/// - 2: minutes (bits 0-5), substituted (bit 6), invalid (bit 7)
/// - 3: hours (bits 0-4), summer time (bit 7)
/// - 4: day of month (bits 0-4), day of week (bits 5-7)
/// - 5: month (bits 0-3)
/// - 6: year since 2000 (bits 0-6)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cp56Time2a([u8; 7]);

impl Cp56Time2a {
    /// Encoded size in bytes.
    pub const SIZE: usize = 7;

    /// Create a validated time tag. `year` counts from 2000 (0..=99).
    pub fn new(year: u8, month: u8, day: u8, hour: u8, minute: u8, millisecond: u16) -> Result<Self> {
        check_range("year", year as u32, 0, 99)?;
        check_range("month", month as u32, 1, 12)?;
        check_range("day", day as u32, 1, 31)?;
        check_range("hour", hour as u32, 0, 23)?;
        check_range("minute", minute as u32, 0, 59)?;
        check_range("millisecond", millisecond as u32, 0, 59_999)?;
        Ok(Self::from_fields(year, month, day, 0, hour, minute, millisecond))
    }

    const fn from_fields(
        year: u8,
        month: u8,
        day: u8,
        day_of_week: u8,
        hour: u8,
        minute: u8,
        millisecond: u16,
    ) -> Self {
        let ms = millisecond.to_le_bytes();
        Self([
            ms[0],
            ms[1],
            minute & 0x3F,
            hour & 0x1F,
            (day & 0x1F) | (day_of_week & 0x07) << 5,
            month & 0x0F,
            year & 0x7F,
        ])
    }

    /// Create from a calendar date and time. The year must be within 2000..=2099.
    pub fn from_datetime(dt: &NaiveDateTime) -> Result<Self> {
        check_range("year", dt.year() as u32, 2000, 2099)?;
        Ok(Self::from_naive_unchecked(dt))
    }

    fn from_naive_unchecked(dt: &NaiveDateTime) -> Self {
        // Leap seconds fold into the last millisecond of the minute
        let millisecond = (dt.second() * 1000 + dt.nanosecond() / 1_000_000).min(59_999);
        Self::from_fields(
            (dt.year().rem_euclid(100)) as u8,
            dt.month() as u8,
            dt.day() as u8,
            dt.weekday().number_from_monday() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            millisecond as u16,
        )
    }

    /// Current UTC time.
    pub fn now() -> Self {
        Self::from_naive_unchecked(&Utc::now().naive_utc())
    }

    /// Create from the encoded bytes.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 7]) -> Self {
        Self(bytes)
    }

    /// Encoded bytes.
    #[inline]
    pub const fn to_bytes(&self) -> [u8; 7] {
        self.0
    }

    /// Set the invalid flag.
    pub const fn with_invalid(mut self, invalid: bool) -> Self {
        self.0[2] = (self.0[2] & 0x7F) | if invalid { 0x80 } else { 0 };
        self
    }

    /// Set the substituted flag.
    pub const fn with_substituted(mut self, substituted: bool) -> Self {
        self.0[2] = (self.0[2] & 0xBF) | if substituted { 0x40 } else { 0 };
        self
    }

    /// Set the summer time flag.
    pub const fn with_summer_time(mut self, summer_time: bool) -> Self {
        self.0[3] = (self.0[3] & 0x7F) | if summer_time { 0x80 } else { 0 };
        self
    }

    /// Set the day of week (1 = Monday .. 7 = Sunday, 0 = unused).
    pub fn with_day_of_week(mut self, day_of_week: u8) -> Result<Self> {
        check_range("day of week", day_of_week as u32, 0, 7)?;
        self.0[4] = (self.0[4] & 0x1F) | day_of_week << 5;
        Ok(self)
    }

    /// Milliseconds within the minute (includes seconds).
    #[inline]
    pub const fn millisecond(&self) -> u16 {
        u16::from_le_bytes([self.0[0], self.0[1]])
    }

    /// Minute (0-59).
    #[inline]
    pub const fn minute(&self) -> u8 {
        self.0[2] & 0x3F
    }

    /// Hour (0-23).
    #[inline]
    pub const fn hour(&self) -> u8 {
        self.0[3] & 0x1F
    }

    /// Day of month (1-31).
    #[inline]
    pub const fn day(&self) -> u8 {
        self.0[4] & 0x1F
    }

    /// Day of week (1-7, 0 if unused).
    #[inline]
    pub const fn day_of_week(&self) -> u8 {
        self.0[4] >> 5
    }

    /// Month (1-12).
    #[inline]
    pub const fn month(&self) -> u8 {
        self.0[5] & 0x0F
    }

    /// Year since 2000 (0-99).
    #[inline]
    pub const fn year(&self) -> u8 {
        self.0[6] & 0x7F
    }

    /// Invalid flag (IV).
    #[inline]
    pub const fn is_invalid(&self) -> bool {
        self.0[2] & 0x80 != 0
    }

    /// Substituted flag.
    #[inline]
    pub const fn is_substituted(&self) -> bool {
        self.0[2] & 0x40 != 0
    }

    /// Summer time flag (SU).
    #[inline]
    pub const fn is_summer_time(&self) -> bool {
        self.0[3] & 0x80 != 0
    }

    /// Convert to a calendar date and time, `None` if the fields do not form
    /// a valid date.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        let ms = self.millisecond() as u32;
        NaiveDate::from_ymd_opt(2000 + self.year() as i32, self.month() as u32, self.day() as u32)?
            .and_hms_milli_opt(self.hour() as u32, self.minute() as u32, ms / 1000, ms % 1000)
    }
}

impl std::fmt::Debug for Cp56Time2a {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cp56Time2a(20{:02}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}{})",
            self.year(),
            self.month(),
            self.day(),
            self.hour(),
            self.minute(),
            self.millisecond() / 1000,
            self.millisecond() % 1000,
            if self.is_invalid() { " IV" } else { "" }
        )
    }
}

/// Three octet binary time (CP24Time2a): milliseconds and minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cp24Time2a([u8; 3]);

impl Cp24Time2a {
    /// Encoded size in bytes.
    pub const SIZE: usize = 3;

    /// Create a validated time tag.
    pub fn new(minute: u8, millisecond: u16) -> Result<Self> {
        check_range("minute", minute as u32, 0, 59)?;
        check_range("millisecond", millisecond as u32, 0, 59_999)?;
        let ms = millisecond.to_le_bytes();
        Ok(Self([ms[0], ms[1], minute]))
    }

    /// Create from the encoded bytes.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(bytes)
    }

    /// Encoded bytes.
    #[inline]
    pub const fn to_bytes(&self) -> [u8; 3] {
        self.0
    }

    /// Set the invalid flag.
    pub const fn with_invalid(mut self, invalid: bool) -> Self {
        self.0[2] = (self.0[2] & 0x7F) | if invalid { 0x80 } else { 0 };
        self
    }

    /// Milliseconds within the minute.
    #[inline]
    pub const fn millisecond(&self) -> u16 {
        u16::from_le_bytes([self.0[0], self.0[1]])
    }

    /// Minute (0-59).
    #[inline]
    pub const fn minute(&self) -> u8 {
        self.0[2] & 0x3F
    }

    /// Invalid flag (IV).
    #[inline]
    pub const fn is_invalid(&self) -> bool {
        self.0[2] & 0x80 != 0
    }
}

/// Two octet binary time (CP16Time2a): elapsed milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Cp16Time2a(u16);

impl Cp16Time2a {
    /// Encoded size in bytes.
    pub const SIZE: usize = 2;

    /// Create from elapsed milliseconds (0..=59999).
    pub fn new(millisecond: u16) -> Result<Self> {
        check_range("elapsed milliseconds", millisecond as u32, 0, 59_999)?;
        Ok(Self(millisecond))
    }

    /// Create from the raw wire value.
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Elapsed milliseconds.
    #[inline]
    pub const fn millisecond(&self) -> u16 {
        self.0
    }
}

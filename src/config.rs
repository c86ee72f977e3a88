//! Connection-scoped protocol parameters.
//!
//! All parameter sets are plain values. A connection copies them when it is
//! created and never observes later changes.

use std::time::Duration;

use crate::error::{Iec60870Error, Result};

/// Default T0 timeout (connection establishment) in seconds.
pub const DEFAULT_T0_TIMEOUT: u64 = 30;

/// Default T1 timeout (send confirmation) in seconds.
pub const DEFAULT_T1_TIMEOUT: u64 = 15;

/// Default T2 timeout (no data acknowledgment) in seconds.
pub const DEFAULT_T2_TIMEOUT: u64 = 10;

/// Default T3 timeout (test frame) in seconds.
pub const DEFAULT_T3_TIMEOUT: u64 = 20;

/// Default K parameter (max unconfirmed I-frames).
pub const DEFAULT_K: u16 = 12;

/// Default W parameter (max unconfirmed receives before sending S-frame).
pub const DEFAULT_W: u16 = 8;

/// Largest value of a 15-bit sequence number plus one.
pub const SEQUENCE_MODULUS: u16 = 32768;

/// Field widths of the application layer.
///
/// Shared by both bindings. IEC 104 normally uses 2/2/3, IEC 101 deployments
/// frequently use 1/1/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppLayerParameters {
    size_of_cot: u8,
    size_of_ca: u8,
    size_of_ioa: u8,
    originator_address: u8,
}

impl AppLayerParameters {
    /// Create a validated parameter set.
    ///
    /// `size_of_cot` must be 1 or 2, `size_of_ca` 1 or 2 and `size_of_ioa`
    /// 1, 2 or 3 bytes.
    pub fn new(size_of_cot: u8, size_of_ca: u8, size_of_ioa: u8) -> Result<Self> {
        if !(1..=2).contains(&size_of_cot) {
            return Err(Iec60870Error::config(format!(
                "cause of transmission size must be 1 or 2, got {}",
                size_of_cot
            )));
        }
        if !(1..=2).contains(&size_of_ca) {
            return Err(Iec60870Error::config(format!(
                "common address size must be 1 or 2, got {}",
                size_of_ca
            )));
        }
        if !(1..=3).contains(&size_of_ioa) {
            return Err(Iec60870Error::config(format!(
                "information object address size must be 1..=3, got {}",
                size_of_ioa
            )));
        }
        Ok(Self {
            size_of_cot,
            size_of_ca,
            size_of_ioa,
            originator_address: 0,
        })
    }

    /// IEC 104 profile: COT 2 bytes, CA 2 bytes, IOA 3 bytes.
    pub const fn iec104() -> Self {
        Self {
            size_of_cot: 2,
            size_of_ca: 2,
            size_of_ioa: 3,
            originator_address: 0,
        }
    }

    /// Common IEC 101 profile: COT 1 byte, CA 1 byte, IOA 2 bytes.
    pub const fn iec101() -> Self {
        Self {
            size_of_cot: 1,
            size_of_ca: 1,
            size_of_ioa: 2,
            originator_address: 0,
        }
    }

    /// Set the originator address used when the COT field is 2 bytes wide.
    pub fn originator_address(mut self, address: u8) -> Self {
        self.originator_address = address;
        self
    }

    /// Width of the cause of transmission field.
    #[inline]
    pub const fn size_of_cot(&self) -> usize {
        self.size_of_cot as usize
    }

    /// Width of the common address field.
    #[inline]
    pub const fn size_of_ca(&self) -> usize {
        self.size_of_ca as usize
    }

    /// Width of the information object address field.
    #[inline]
    pub const fn size_of_ioa(&self) -> usize {
        self.size_of_ioa as usize
    }

    /// Default originator address for outbound ASDUs.
    #[inline]
    pub const fn default_originator(&self) -> u8 {
        self.originator_address
    }

    /// Largest common address representable with this width.
    #[inline]
    pub const fn max_common_address(&self) -> u16 {
        if self.size_of_ca == 1 {
            0xFF
        } else {
            0xFFFF
        }
    }

    /// Largest information object address representable with this width.
    #[inline]
    pub const fn max_ioa(&self) -> u32 {
        match self.size_of_ioa {
            1 => 0xFF,
            2 => 0xFFFF,
            _ => 0xFF_FFFF,
        }
    }

    /// Size of the fixed ASDU header (type, VSQ, COT, CA).
    #[inline]
    pub const fn header_size(&self) -> usize {
        2 + self.size_of_cot() + self.size_of_ca()
    }
}

impl Default for AppLayerParameters {
    fn default() -> Self {
        Self::iec104()
    }
}

/// APCI parameters of an IEC 104 connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApciParameters {
    /// K parameter: max unconfirmed I-frames
    pub k: u16,
    /// W parameter: max unconfirmed receives before sending S-frame
    pub w: u16,
    /// T0 timeout: connection establishment
    pub t0: Duration,
    /// T1 timeout: time to wait for send confirmation
    pub t1: Duration,
    /// T2 timeout: time to wait before sending S-frame when no data
    pub t2: Duration,
    /// T3 timeout: idle time before sending a test frame
    pub t3: Duration,
}

impl ApciParameters {
    /// Set K.
    pub fn k(mut self, k: u16) -> Self {
        self.k = k;
        self
    }

    /// Set W.
    pub fn w(mut self, w: u16) -> Self {
        self.w = w;
        self
    }

    /// Set T0 timeout.
    pub fn t0(mut self, timeout: Duration) -> Self {
        self.t0 = timeout;
        self
    }

    /// Set T1 timeout.
    pub fn t1(mut self, timeout: Duration) -> Self {
        self.t1 = timeout;
        self
    }

    /// Set T2 timeout.
    pub fn t2(mut self, timeout: Duration) -> Self {
        self.t2 = timeout;
        self
    }

    /// Set T3 timeout.
    pub fn t3(mut self, timeout: Duration) -> Self {
        self.t3 = timeout;
        self
    }

    /// Check the parameter set for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 || self.k >= SEQUENCE_MODULUS {
            return Err(Iec60870Error::config(format!("k must be 1..=32767, got {}", self.k)));
        }
        if self.w == 0 || self.w >= SEQUENCE_MODULUS {
            return Err(Iec60870Error::config(format!("w must be 1..=32767, got {}", self.w)));
        }
        if self.t1.is_zero() || self.t3.is_zero() {
            return Err(Iec60870Error::config("t1 and t3 must be non-zero"));
        }
        if self.t2 >= self.t1 {
            return Err(Iec60870Error::config("t2 must be shorter than t1"));
        }
        Ok(())
    }
}

impl Default for ApciParameters {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            w: DEFAULT_W,
            t0: Duration::from_secs(DEFAULT_T0_TIMEOUT),
            t1: Duration::from_secs(DEFAULT_T1_TIMEOUT),
            t2: Duration::from_secs(DEFAULT_T2_TIMEOUT),
            t3: Duration::from_secs(DEFAULT_T3_TIMEOUT),
        }
    }
}

/// Link layer parameters of an IEC 101 connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkLayerParameters {
    /// Link address width in bytes (0, 1 or 2)
    pub address_length: u8,
    /// Time to wait for a single response frame
    pub timeout_for_ack: Duration,
    /// Overall bound of the link status / reset handshake
    pub init_timeout: Duration,
    /// Number of repetitions after the first attempt
    pub retries: u8,
    /// Interval between class 1 / class 2 poll cycles
    pub poll_interval: Duration,
    /// Answer with 0xE5 instead of a fixed ACK frame where allowed
    pub use_single_char_ack: bool,
    /// Capacity of each secondary user data queue
    pub queue_size: usize,
}

impl LinkLayerParameters {
    /// Set the link address width.
    pub fn address_length(mut self, length: u8) -> Self {
        self.address_length = length;
        self
    }

    /// Set the response timeout.
    pub fn timeout_for_ack(mut self, timeout: Duration) -> Self {
        self.timeout_for_ack = timeout;
        self
    }

    /// Set the handshake bound.
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Set the retry count.
    pub fn retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }

    /// Set the poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enable or disable single character acknowledgments.
    pub fn use_single_char_ack(mut self, enabled: bool) -> Self {
        self.use_single_char_ack = enabled;
        self
    }

    /// Set the queue capacity.
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    /// Broadcast link address for the configured width.
    #[inline]
    pub const fn broadcast_address(&self) -> u16 {
        if self.address_length == 2 {
            0xFFFF
        } else {
            0xFF
        }
    }

    /// Check the parameter set for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.address_length > 2 {
            return Err(Iec60870Error::config(format!(
                "link address length must be 0..=2, got {}",
                self.address_length
            )));
        }
        if self.timeout_for_ack.is_zero() || self.poll_interval.is_zero() {
            return Err(Iec60870Error::config(
                "timeout_for_ack and poll_interval must be non-zero",
            ));
        }
        if self.init_timeout < self.timeout_for_ack {
            return Err(Iec60870Error::config("init_timeout must cover at least one ack timeout"));
        }
        if self.queue_size == 0 {
            return Err(Iec60870Error::config("queue_size must be non-zero"));
        }
        Ok(())
    }

    /// Check that a link address fits the configured width.
    pub fn check_address(&self, address: u16) -> Result<()> {
        let max = match self.address_length {
            0 => 0,
            1 => 0xFF,
            _ => 0xFFFF,
        };
        if address > max {
            return Err(Iec60870Error::domain(format!(
                "link address {} exceeds {}-byte field",
                address, self.address_length
            )));
        }
        Ok(())
    }
}

impl Default for LinkLayerParameters {
    fn default() -> Self {
        Self {
            address_length: 1,
            timeout_for_ack: Duration::from_millis(500),
            init_timeout: Duration::from_secs(5),
            retries: 2,
            poll_interval: Duration::from_millis(1000),
            use_single_char_ack: true,
            queue_size: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_layer_validation() {
        assert!(AppLayerParameters::new(1, 1, 1).is_ok());
        assert!(AppLayerParameters::new(2, 2, 3).is_ok());
        assert!(matches!(
            AppLayerParameters::new(0, 2, 3),
            Err(Iec60870Error::Config(_))
        ));
        assert!(AppLayerParameters::new(3, 2, 3).is_err());
        assert!(AppLayerParameters::new(2, 3, 3).is_err());
        assert!(AppLayerParameters::new(2, 2, 4).is_err());
    }

    #[test]
    fn test_app_layer_limits() {
        let params = AppLayerParameters::iec101();
        assert_eq!(params.max_common_address(), 0xFF);
        assert_eq!(params.max_ioa(), 0xFFFF);
        assert_eq!(params.header_size(), 4);

        let params = AppLayerParameters::iec104();
        assert_eq!(params.max_common_address(), 0xFFFF);
        assert_eq!(params.max_ioa(), 0xFF_FFFF);
        assert_eq!(params.header_size(), 6);
    }

    #[test]
    fn test_apci_defaults_valid() {
        let params = ApciParameters::default();
        assert_eq!(params.k, DEFAULT_K);
        assert_eq!(params.w, DEFAULT_W);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_apci_validation() {
        assert!(ApciParameters::default().k(0).validate().is_err());
        assert!(ApciParameters::default().w(0).validate().is_err());
        assert!(ApciParameters::default().k(32768).validate().is_err());
        assert!(ApciParameters::default()
            .t2(Duration::from_secs(20))
            .validate()
            .is_err());
    }

    #[test]
    fn test_link_layer_validation() {
        assert!(LinkLayerParameters::default().validate().is_ok());
        assert!(LinkLayerParameters::default().address_length(3).validate().is_err());
        assert!(LinkLayerParameters::default().queue_size(0).validate().is_err());
    }

    #[test]
    fn test_link_address_check() {
        let params = LinkLayerParameters::default();
        assert!(params.check_address(0xFF).is_ok());
        assert!(params.check_address(0x100).is_err());
        assert_eq!(params.broadcast_address(), 0xFF);

        let params = params.address_length(2);
        assert!(params.check_address(0x1234).is_ok());
        assert_eq!(params.broadcast_address(), 0xFFFF);
    }
}

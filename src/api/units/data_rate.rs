/*
 *  Copyright (c) 2018 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

// DataRate represents a given data rate. This can be used to represent
// bandwidth, encoding bitrate, etc. The internal storage is bits per second
// (bps).

use std::fmt;
use std::ops::*;

use super::{DataSize, TimeDelta};

super::relative_unit!(DataRate);

impl DataRate {
    const ONE_SIDED: bool = true;

    pub const fn from_bits_per_sec(value: i64) -> Self {
        Self::from_value(value)
    }

    pub fn from_bits_per_sec_float(value: f64) -> Self {
        Self::from_value_float(value)
    }

    pub const fn from_bytes_per_sec(value: i64) -> Self {
        Self::from_fraction(8, value)
    }

    pub const fn from_kilobits_per_sec(value: i64) -> Self {
        Self::from_fraction(1000, value)
    }

    pub fn from_kilobits_per_sec_float(value: f64) -> Self {
        Self::from_fraction_float(1000.0, value)
    }

    pub const fn infinity() -> Self {
        Self::plus_infinity()
    }

    pub const fn bps(&self) -> i64 {
        self.to_value()
    }

    pub fn bps_float(&self) -> f64 {
        self.to_value_float()
    }

    pub const fn bytes_per_sec(&self) -> i64 {
        self.to_fraction(8)
    }

    pub const fn kbps(&self) -> i64 {
        self.to_fraction(1000)
    }

    pub fn kbps_float(&self) -> f64 {
        self.to_fraction_float(1000.0)
    }

    pub const fn bps_or(&self, fallback_value: i64) -> i64 {
        self.to_value_or(fallback_value)
    }

    pub const fn kbps_or(&self, fallback_value: i64) -> i64 {
        self.to_fraction_or(1000, fallback_value)
    }
}

impl Div<TimeDelta> for DataSize {
    type Output = DataRate;

    fn div(self, duration: TimeDelta) -> Self::Output {
        if self.is_plus_infinity() {
            return DataRate::plus_infinity();
        }
        if duration.is_plus_infinity() {
            return DataRate::zero();
        }
        match self.bytes().checked_mul(8_000_000) {
            Some(microbits) => DataRate::from_bits_per_sec(microbits / duration.us()),
            None => DataRate::from_bits_per_sec_float(
                self.bytes_float() * 8.0 / duration.seconds_float(),
            ),
        }
    }
}

impl Div<DataRate> for DataSize {
    type Output = TimeDelta;

    fn div(self, rate: DataRate) -> Self::Output {
        if self.is_plus_infinity() {
            return TimeDelta::plus_infinity();
        }
        if rate.is_plus_infinity() {
            return TimeDelta::zero();
        }
        match self.bytes().checked_mul(8_000_000) {
            Some(microbits) => TimeDelta::from_micros(microbits / rate.bps()),
            None => TimeDelta::from_seconds_float(self.bytes_float() * 8.0 / rate.bps_float()),
        }
    }
}

impl Mul<TimeDelta> for DataRate {
    type Output = DataSize;

    fn mul(self, duration: TimeDelta) -> Self::Output {
        if self.is_plus_infinity() || duration.is_plus_infinity() {
            return DataSize::plus_infinity();
        }
        match self
            .bps()
            .checked_mul(duration.us())
            .and_then(|microbits| microbits.checked_add(4_000_000))
        {
            Some(microbits) => DataSize::from_bytes(microbits / 8_000_000),
            None => DataSize::from_bytes_float(
                (self.bps_float() * duration.seconds_float() / 8.0).round(),
            ),
        }
    }
}

impl Mul<DataRate> for TimeDelta {
    type Output = DataSize;

    fn mul(self, rate: DataRate) -> Self::Output {
        rate * self
    }
}

impl fmt::Debug for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_plus_infinity() {
            write!(f, "+inf bps")
        } else if self.bps() == 0 || self.bps() % 1000 != 0 {
            write!(f, "{} bps", self.bps())
        } else {
            write!(f, "{} kbps", self.kbps())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn const_expr() {
        const VALUE: i64 = 12345;
        const RATE_BPS: DataRate = DataRate::from_bits_per_sec(VALUE);
        const RATE_KBPS: DataRate = DataRate::from_kilobits_per_sec(VALUE);
        assert_eq!(DataRate::default(), DataRate::zero());
        assert_eq!(DataRate::infinity().bps_or(-1), -1);
        assert_eq!(RATE_BPS.bps(), VALUE);
        assert_eq!(RATE_KBPS.kbps_or(0), VALUE);
        assert_eq!(DataRate::from_bytes_per_sec(VALUE).bytes_per_sec(), VALUE);
    }

    #[test]
    fn converts_to_and_from_double() {
        const VALUE: i64 = 128;
        assert_eq!(DataRate::from_bits_per_sec(VALUE).bps_float(), VALUE as f64);
        assert_eq!(DataRate::from_bits_per_sec(500).kbps_float(), 0.5);
        assert_eq!(DataRate::from_kilobits_per_sec_float(0.5).bps(), 500);
        assert!(DataRate::from_bits_per_sec_float(f64::INFINITY).is_infinite());
    }

    #[test]
    fn scaling_rounds_to_nearest() {
        let rate = DataRate::from_bits_per_sec(450);
        assert_eq!((rate * 0.9).bps(), 405);
        assert_eq!((0.5 * rate).bps(), 225);
        assert!(((rate / 0.5).bps() - 900).abs() <= 1);
        assert_eq!(rate / DataRate::from_bits_per_sec(225), 2.0);
    }

    #[test]
    fn data_rate_and_data_size_and_time_delta() {
        const SECONDS: i64 = 5;
        const BITS_PER_SECOND: i64 = 440;
        const BYTES: i64 = 44000;
        let delta = TimeDelta::from_seconds(SECONDS);
        let rate = DataRate::from_bits_per_sec(BITS_PER_SECOND);
        let size = DataSize::from_bytes(BYTES);
        assert_eq!((delta * rate).bytes(), SECONDS * BITS_PER_SECOND / 8);
        assert_eq!((rate * delta).bytes(), SECONDS * BITS_PER_SECOND / 8);
        assert_eq!((size / delta).bps(), BYTES * 8 / SECONDS);
        assert_eq!((size / rate).seconds(), BYTES * 8 / BITS_PER_SECOND);
    }

    #[test]
    fn large_sizes_fall_back_to_float_math() {
        let large = DataSize::from_bytes(i64::MAX / 8_000_000 + 1);
        let rate = DataRate::from_kilobits_per_sec(100);
        let expected_seconds = large.bytes_float() * 8.0 / 100_000.0;
        assert_relative_eq!(
            (large / rate).seconds_float(),
            expected_seconds,
            max_relative = 1e-9
        );
        assert_eq!(
            large / TimeDelta::from_seconds(1),
            DataRate::from_bits_per_sec(large.bytes() * 8)
        );
    }

    #[test]
    fn overflowing_products_saturate() {
        let rate = DataRate::from_kilobits_per_sec(1_000);
        assert!((rate * 1e16).is_plus_infinity());
        assert!(DataRate::from_bits_per_sec_float(1e30).is_plus_infinity());
        let long = TimeDelta::from_seconds(i64::MAX / 1_000_000);
        let size = rate * long;
        assert!(size.is_finite());
        assert_relative_eq!(
            size.bytes_float(),
            long.seconds_float() * 125_000.0,
            max_relative = 1e-9
        );
        assert!((DataRate::infinity() * TimeDelta::from_millis(5)).is_plus_infinity());
        assert!((DataSize::infinity() / TimeDelta::from_millis(5)).is_plus_infinity());
        assert_eq!(DataSize::from_bytes(100) / DataRate::infinity(), TimeDelta::zero());
    }
}

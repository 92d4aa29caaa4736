/*
 *  Copyright (c) 2018 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

// Shared storage and conversions for every unit type. Each unit is a newtype
// over i64 where i64::MAX and i64::MIN are reserved for plus and minus
// infinity. A macro is used because associated consts can't be shared via
// traits in the way we need here; each type provides its own `ONE_SIDED`.
macro_rules! unit_base {
    ($ty:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $ty(i64);

        #[allow(dead_code)]
        impl $ty {
            pub const fn zero() -> Self {
                Self(0)
            }

            pub const fn plus_infinity() -> Self {
                Self(i64::MAX)
            }

            pub const fn minus_infinity() -> Self {
                Self(i64::MIN)
            }

            pub const fn is_zero(&self) -> bool {
                self.0 == 0
            }

            pub const fn is_finite(&self) -> bool {
                !self.is_infinite()
            }

            pub const fn is_infinite(&self) -> bool {
                self.0 == i64::MAX || self.0 == i64::MIN
            }

            pub const fn is_plus_infinity(&self) -> bool {
                self.0 == i64::MAX
            }

            pub const fn is_minus_infinity(&self) -> bool {
                self.0 == i64::MIN
            }

            pub const fn round_to(&self, resolution: Self) -> Self {
                assert!(self.is_finite());
                assert!(resolution.is_finite());
                assert!(resolution.0 > 0);
                Self::from_value(((self.0 + resolution.0 / 2) / resolution.0) * resolution.0)
            }

            pub const fn round_up_to(&self, resolution: Self) -> Self {
                assert!(self.is_finite());
                assert!(resolution.is_finite());
                assert!(resolution.0 > 0);
                Self::from_value(((self.0 + resolution.0 - 1) / resolution.0) * resolution.0)
            }

            pub const fn round_down_to(&self, resolution: Self) -> Self {
                assert!(self.is_finite());
                assert!(resolution.is_finite());
                assert!(resolution.0 > 0);
                Self::from_value((self.0 / resolution.0) * resolution.0)
            }

            const fn from_fraction(denominator: i64, value: i64) -> Self {
                assert!(denominator >= 0);
                Self::from_value_saturating(value.saturating_mul(denominator))
            }

            fn from_fraction_float(denominator: f64, value: f64) -> Self {
                Self::from_value_float(value * denominator)
            }

            const fn to_fraction(&self, denominator: i64) -> i64 {
                self.divide_round_to_nearest(denominator)
            }

            const fn divide_round_to_nearest(&self, d: i64) -> i64 {
                assert!(d > 0);
                let v = self.to_value();
                let mut result = v / d;
                let remainder = v % d;
                if remainder.abs() * 2 >= d {
                    if v < 0 {
                        result -= 1
                    } else {
                        result += 1
                    }
                }
                result
            }

            fn to_fraction_float(&self, denominator: f64) -> f64 {
                assert!(denominator > 0.0);
                self.to_value_float() / denominator
            }

            const fn to_fraction_or(&self, denominator: i64, fallback_value: i64) -> i64 {
                if self.is_finite() {
                    self.divide_round_to_nearest(denominator)
                } else {
                    fallback_value
                }
            }

            const fn to_multiple(&self, factor: i64) -> i64 {
                assert!(factor >= 0);
                self.to_value() * factor
            }

            fn to_multiple_float(&self, factor: f64) -> f64 {
                assert!(factor >= 0.0);
                self.to_value_float() * factor
            }

            const fn from_value(value: i64) -> Self {
                assert!(value != i64::MAX && value != i64::MIN);
                if Self::ONE_SIDED {
                    assert!(value >= 0);
                }
                Self(value)
            }

            // Results of saturating integer arithmetic, where i64::MAX and
            // i64::MIN already mean plus and minus infinity.
            pub(crate) const fn from_value_saturating(value: i64) -> Self {
                if Self::ONE_SIDED {
                    assert!(value >= 0);
                }
                Self(value)
            }

            fn from_value_float(value: f64) -> Self {
                assert!(!value.is_nan());
                if Self::ONE_SIDED {
                    assert!(value >= 0.0);
                }
                if value >= i64::MAX as f64 {
                    Self::plus_infinity()
                } else if value <= i64::MIN as f64 {
                    Self::minus_infinity()
                } else {
                    Self::from_value(value as i64)
                }
            }

            const fn to_value(&self) -> i64 {
                assert!(self.is_finite());
                self.0
            }

            const fn to_value_or(&self, fallback_value: i64) -> i64 {
                if self.is_finite() {
                    self.0
                } else {
                    fallback_value
                }
            }

            fn to_value_float(&self) -> f64 {
                if self.is_plus_infinity() {
                    f64::INFINITY
                } else if self.is_minus_infinity() {
                    f64::NEG_INFINITY
                } else {
                    self.0 as f64
                }
            }
        }
    };
}

pub(crate) use unit_base;

/*
 *  Copyright (c) 2018 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

// Arithmetic shared by units that are differences (durations, sizes, rates),
// as opposed to points in time. Infinity propagates through addition and
// subtraction, and results that overflow saturate to infinity. Combining
// opposite infinities is a programming error.
macro_rules! relative_unit {
    ($ty:ident) => {
        crate::api::units::unit_base!($ty);

        impl $ty {
            pub fn clamped(&self, min_value: Self, max_value: Self) -> Self {
                Self(self.0.max(min_value.0).min(max_value.0))
            }
        }

        impl ::std::ops::Add for $ty {
            type Output = Self;

            fn add(self, rhs: Self) -> Self::Output {
                if self.is_plus_infinity() || rhs.is_plus_infinity() {
                    assert!(!self.is_minus_infinity());
                    assert!(!rhs.is_minus_infinity());
                    return Self::plus_infinity();
                } else if self.is_minus_infinity() || rhs.is_minus_infinity() {
                    assert!(!self.is_plus_infinity());
                    assert!(!rhs.is_plus_infinity());
                    return Self::minus_infinity();
                }
                Self::from_value_saturating(self.to_value().saturating_add(rhs.to_value()))
            }
        }

        impl ::std::ops::Sub for $ty {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self::Output {
                if self.is_plus_infinity() || rhs.is_minus_infinity() {
                    assert!(!self.is_minus_infinity());
                    assert!(!rhs.is_plus_infinity());
                    return Self::plus_infinity();
                } else if self.is_minus_infinity() || rhs.is_plus_infinity() {
                    assert!(!self.is_plus_infinity());
                    assert!(!rhs.is_minus_infinity());
                    return Self::minus_infinity();
                }
                Self::from_value_saturating(self.to_value().saturating_sub(rhs.to_value()))
            }
        }

        impl ::std::ops::AddAssign for $ty {
            fn add_assign(&mut self, rhs: Self) {
                *self = *self + rhs;
            }
        }

        impl ::std::ops::SubAssign for $ty {
            fn sub_assign(&mut self, rhs: Self) {
                *self = *self - rhs;
            }
        }

        impl ::std::ops::Div for $ty {
            type Output = f64;

            fn div(self, rhs: Self) -> Self::Output {
                self.to_value_float() / rhs.to_value_float()
            }
        }

        impl ::std::ops::Div<f64> for $ty {
            type Output = Self;

            fn div(self, rhs: f64) -> Self::Output {
                Self::from_value_float((self.to_value_float() / rhs).round())
            }
        }

        impl ::std::ops::Div<i64> for $ty {
            type Output = Self;

            fn div(self, rhs: i64) -> Self::Output {
                Self::from_value(self.to_value() / rhs)
            }
        }

        impl ::std::ops::Mul<f64> for $ty {
            type Output = Self;

            fn mul(self, rhs: f64) -> Self::Output {
                Self::from_value_float((self.to_value_float() * rhs).round())
            }
        }

        impl ::std::ops::Mul<i64> for $ty {
            type Output = Self;

            fn mul(self, rhs: i64) -> Self::Output {
                Self::from_value_saturating(self.to_value().saturating_mul(rhs))
            }
        }

        impl ::std::ops::Mul<i32> for $ty {
            type Output = Self;

            fn mul(self, rhs: i32) -> Self::Output {
                self * i64::from(rhs)
            }
        }

        impl ::std::ops::Mul<usize> for $ty {
            type Output = Self;

            fn mul(self, rhs: usize) -> Self::Output {
                self * i64::try_from(rhs).unwrap_or(i64::MAX)
            }
        }

        impl ::std::ops::Neg for $ty {
            type Output = Self;

            fn neg(self) -> Self::Output {
                if self.is_plus_infinity() {
                    Self::minus_infinity()
                } else if self.is_minus_infinity() {
                    Self::plus_infinity()
                } else {
                    Self::from_value(-self.to_value())
                }
            }
        }

        impl ::std::ops::Mul<$ty> for f64 {
            type Output = $ty;

            fn mul(self, rhs: $ty) -> Self::Output {
                rhs * self
            }
        }

        impl ::std::ops::Mul<$ty> for i64 {
            type Output = $ty;

            fn mul(self, rhs: $ty) -> Self::Output {
                rhs * self
            }
        }

        impl ::std::ops::Mul<$ty> for i32 {
            type Output = $ty;

            fn mul(self, rhs: $ty) -> Self::Output {
                rhs * self
            }
        }

        impl ::std::ops::Mul<$ty> for usize {
            type Output = $ty;

            fn mul(self, rhs: $ty) -> Self::Output {
                rhs * self
            }
        }
    };
}

pub(crate) use relative_unit;

#[cfg(test)]
mod test {
    relative_unit!(TestUnit);

    impl std::fmt::Debug for TestUnit {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "TestUnit({})", self.0)
        }
    }

    impl TestUnit {
        const ONE_SIDED: bool = false;

        const fn from_kilo(kilo: i64) -> Self {
            Self::from_fraction(1000, kilo)
        }

        const fn kilo(&self) -> i64 {
            self.to_fraction(1000)
        }

        const fn kilo_or(&self, fallback: i64) -> i64 {
            self.to_fraction_or(1000, fallback)
        }
    }

    #[test]
    fn infinity_propagates_through_addition() {
        let finite = TestUnit::from_value(267);
        assert!((TestUnit::plus_infinity() + finite).is_plus_infinity());
        assert!((finite + TestUnit::plus_infinity()).is_plus_infinity());
        assert!((finite - TestUnit::minus_infinity()).is_plus_infinity());
        assert!((TestUnit::minus_infinity() + finite).is_minus_infinity());
        assert!((finite - TestUnit::plus_infinity()).is_minus_infinity());
        assert_eq!(TestUnit::plus_infinity().kilo_or(-1), -1);
    }

    #[test]
    #[should_panic]
    fn adding_opposite_infinities_panics() {
        let _ = TestUnit::plus_infinity() + TestUnit::minus_infinity();
    }

    #[test]
    #[should_panic]
    fn nan_is_rejected() {
        let _ = TestUnit::from_value_float(f64::NAN);
    }

    #[test]
    fn division_by_int_truncates_towards_zero() {
        assert_eq!(TestUnit::from_value(789) / 10, TestUnit::from_value(78));
        assert_eq!(TestUnit::from_value(-789) / 10, TestUnit::from_value(-78));
    }

    #[test]
    fn rounding_to_nearest_fraction() {
        assert_eq!(TestUnit::from_value(1499).kilo(), 1);
        assert_eq!(TestUnit::from_value(1500).kilo(), 2);
        assert_eq!(TestUnit::from_value(-1500).kilo(), -2);
        assert_eq!(TestUnit::from_kilo(3).kilo(), 3);
    }

    #[test]
    fn clamping() {
        let upper = TestUnit::from_value(800);
        let lower = TestUnit::from_value(100);
        assert_eq!(TestUnit::from_value(50).clamped(lower, upper), lower);
        assert_eq!(TestUnit::from_value(500).clamped(lower, upper), TestUnit::from_value(500));
        assert_eq!(TestUnit::from_value(1000).clamped(lower, upper), upper);
        assert_eq!(TestUnit::from_value(1000).clamp(lower, upper), upper);
    }

    #[test]
    fn overflow_saturates_to_infinity() {
        let large = TestUnit::from_value(i64::MAX / 2);
        assert!((large * 1e16).is_plus_infinity());
        assert!((large * -1e16).is_minus_infinity());
        assert!((large * 3i64).is_plus_infinity());
        assert!((large * 3usize).is_plus_infinity());
        assert!((large + large + large).is_plus_infinity());
        assert!((-large - large - large).is_minus_infinity());
        assert!(TestUnit::from_value_float(1e30).is_plus_infinity());
        assert!(TestUnit::from_value_float(-1e30).is_minus_infinity());
        assert!(TestUnit::from_kilo(i64::MAX / 10).is_plus_infinity());
    }

    #[test]
    fn unary_minus_swaps_infinities() {
        assert_eq!(-TestUnit::plus_infinity(), TestUnit::minus_infinity());
        assert_eq!(-TestUnit::minus_infinity(), TestUnit::plus_infinity());
        assert_eq!(-TestUnit::from_value(1337), TestUnit::from_value(-1337));
    }
}

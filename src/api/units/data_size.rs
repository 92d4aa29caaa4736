/*
 *  Copyright (c) 2019 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::fmt;

// DataSize is a count of bytes. Used for packet sizes, budgets and bytes in
// flight. Negative sizes are invalid; a pacing debt is expressed separately.
super::relative_unit!(DataSize);

impl DataSize {
    const ONE_SIDED: bool = true;

    pub const fn from_bytes(value: i64) -> Self {
        Self::from_value(value)
    }

    pub fn from_bytes_float(value: f64) -> Self {
        Self::from_value_float(value)
    }

    pub const fn infinity() -> Self {
        Self::plus_infinity()
    }

    pub const fn bytes(&self) -> i64 {
        self.to_value()
    }

    pub fn bytes_float(&self) -> f64 {
        self.to_value_float()
    }

    pub const fn bytes_or(&self, fallback_value: i64) -> i64 {
        self.to_value_or(fallback_value)
    }

    pub const fn microbits(&self) -> i64 {
        const MAX_BEFORE_CONVERSION: i64 = i64::MAX / 8_000_000;
        assert!(
            self.bytes() <= MAX_BEFORE_CONVERSION,
            "size is too large to be expressed in microbits"
        );
        self.bytes() * 8_000_000
    }

    /// Subtraction that stops at zero instead of asserting.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if rhs >= self {
            Self::zero()
        } else {
            self - rhs
        }
    }
}

impl fmt::Debug for DataSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_plus_infinity() {
            write!(f, "+inf bytes")
        } else {
            write!(f, "{} bytes", self.bytes())
        }
    }
}

impl std::iter::Sum for DataSize {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, size| acc + size)
    }
}

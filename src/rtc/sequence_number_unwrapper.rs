/*
 *  Copyright (c) 2013 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

// Half-way mark for u16.
const BREAKPOINT: u16 = (u16::MAX >> 1) + 1;

// NB: Doesn't fulfill strict weak ordering requirements, don't sort with it.
pub const fn is_newer_sequence_number(sequence_number: u16, prev_sequence_number: u16) -> bool {
    // Values exactly BREAKPOINT apart: the larger one is newer, so that
    // is_newer(a, b) and is_newer(b, a) are never both false.
    match sequence_number.wrapping_sub(prev_sequence_number) {
        1..BREAKPOINT => true,
        BREAKPOINT => sequence_number > prev_sequence_number,
        _ => false,
    }
}

pub const fn latest_sequence_number(sequence_number1: u16, sequence_number2: u16) -> u16 {
    if is_newer_sequence_number(sequence_number1, sequence_number2) {
        sequence_number1
    } else {
        sequence_number2
    }
}

/// Extends 16-bit wrapping sequence numbers into a monotonic 64-bit space.
///
/// Each value is placed at the closest distance from the previous one, so
/// steps of up to half the range in either direction are unwrapped correctly.
#[derive(Debug, Clone, Default)]
pub struct SequenceNumberUnwrapper {
    last_value: Option<u16>,
    last_unwrapped: i64,
}

impl SequenceNumberUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unwrap(&mut self, value: u16) -> i64 {
        match self.last_value {
            None => self.last_unwrapped = value as i64,
            Some(last) if value == last || is_newer_sequence_number(value, last) => {
                self.last_unwrapped += value.wrapping_sub(last) as i64;
            }
            Some(last) => {
                self.last_unwrapped -= last.wrapping_sub(value) as i64;
            }
        }
        self.last_value = Some(value);
        self.last_unwrapped
    }

    /// Unwraps assuming `value` never precedes the previous one.
    pub fn unwrap_forward(&mut self, value: u16) -> i64 {
        match self.last_value {
            None => self.last_unwrapped = value as i64,
            Some(last) => self.last_unwrapped += value.wrapping_sub(last) as i64,
        }
        self.last_value = Some(value);
        self.last_unwrapped
    }

    /// Unwraps assuming `value` never follows the previous one.
    pub fn unwrap_backwards(&mut self, value: u16) -> i64 {
        match self.last_value {
            None => self.last_unwrapped = value as i64,
            Some(last) => self.last_unwrapped -= last.wrapping_sub(value) as i64,
        }
        self.last_value = Some(value);
        self.last_unwrapped
    }

    pub fn last_unwrapped(&self) -> Option<i64> {
        self.last_value.map(|_| self.last_unwrapped)
    }
}

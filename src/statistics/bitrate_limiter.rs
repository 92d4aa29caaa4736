/*
 *  Copyright (c) 2016 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::api::units::{DataRate, DataSize, TimeDelta, Timestamp};

use super::BitrateStatistics;

/// Caps the send rate of an optional stream, e.g. retransmissions, over a
/// sliding window.
#[derive(Debug, Clone)]
pub struct BitrateLimiter {
    current_rate: BitrateStatistics,
    window: TimeDelta,
    max_rate: DataRate,
}

impl BitrateLimiter {
    pub fn new(max_window: TimeDelta) -> Self {
        Self {
            current_rate: BitrateStatistics::new(max_window),
            window: max_window,
            max_rate: DataRate::infinity(),
        }
    }

    /// Returns true and records the usage if sending `size` at `now` keeps the
    /// windowed rate at or below the max rate.
    ///
    /// Without a current rate estimate usage is always allowed, otherwise a
    /// single large packet could block a low rate stream forever.
    pub fn try_consume(&mut self, size: DataSize, now: Timestamp) -> bool {
        if let Some(current_rate) = self.current_rate.rate(now) {
            let addition = size / self.window;
            if !self.max_rate.is_infinite() && current_rate + addition > self.max_rate {
                return false;
            }
        }
        self.current_rate.update(size.bytes(), now);
        true
    }

    pub fn set_max_rate(&mut self, max_rate: DataRate) {
        self.max_rate = max_rate;
    }

    pub fn max_rate(&self) -> DataRate {
        self.max_rate
    }

    /// Fails if the window is not positive or exceeds the one given at
    /// construction.
    pub fn set_window_size(&mut self, window: TimeDelta, now: Timestamp) -> bool {
        if !self.current_rate.set_window_size(window, now) {
            return false;
        }
        self.window = window;
        true
    }
}

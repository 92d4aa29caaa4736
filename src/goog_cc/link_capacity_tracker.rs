/*
 *  Copyright (c) 2012 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::api::units::{DataRate, TimeDelta, Timestamp};

// Tracks the link capacity as the exponentially smoothed maximum of the
// target bitrate, lowered immediately by delay based and RTT backoff drops.
#[derive(Debug, Clone)]
pub struct LinkCapacityTracker {
    tracking_window: TimeDelta,
    capacity_estimate: DataRate,
    last_delay_based_estimate: DataRate,
    last_link_capacity_update: Timestamp,
}

impl LinkCapacityTracker {
    pub fn new(tracking_window: TimeDelta) -> Self {
        assert!(tracking_window > TimeDelta::zero());
        Self {
            tracking_window,
            capacity_estimate: DataRate::zero(),
            last_delay_based_estimate: DataRate::plus_infinity(),
            last_link_capacity_update: Timestamp::minus_infinity(),
        }
    }

    /// Only used until the first capacity update.
    pub fn on_starting_bitrate(&mut self, bitrate: DataRate) {
        if self.last_link_capacity_update.is_infinite() {
            tracing::debug!(?bitrate, "starting link capacity");
            self.capacity_estimate = bitrate;
        }
    }

    pub fn on_delay_based_estimate(&mut self, bitrate: DataRate, at_time: Timestamp) {
        if bitrate < self.last_delay_based_estimate {
            self.capacity_estimate = std::cmp::min(self.capacity_estimate, bitrate);
            self.last_link_capacity_update = at_time;
        }
        self.last_delay_based_estimate = bitrate;
    }

    pub fn on_rtt_backoff_estimate(&mut self, bitrate: DataRate, at_time: Timestamp) {
        self.capacity_estimate = std::cmp::min(self.capacity_estimate, bitrate);
        self.last_link_capacity_update = at_time;
    }

    pub fn on_bitrate_updated(&mut self, bitrate: DataRate, at_time: Timestamp) {
        if bitrate > self.capacity_estimate {
            let delta = at_time - self.last_link_capacity_update;
            let alpha = if delta.is_finite() {
                (-(delta / self.tracking_window)).exp()
            } else {
                0.0
            };
            let estimate_bps = alpha * self.capacity_estimate.bps_float()
                + (1.0 - alpha) * bitrate.bps_float();
            self.capacity_estimate = DataRate::from_bits_per_sec_float(estimate_bps.max(0.0));
        }
        self.last_link_capacity_update = at_time;
    }

    pub fn estimate(&self) -> DataRate {
        self.capacity_estimate
    }
}

/*
 *  Copyright (c) 2012 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::{
    api::units::{DataRate, TimeDelta, Timestamp},
    remote_bitrate_estimator::RateControlState,
};

// WebRTC-BweLossExperiment
#[derive(Clone, Debug)]
pub struct LossReportBasedBweConfig {
    pub low_loss_threshold: f32,  // Enabled-*
    pub high_loss_threshold: f32, // Enabled-*-*
    pub bitrate_threshold: DataRate,
}

impl Default for LossReportBasedBweConfig {
    fn default() -> Self {
        Self {
            low_loss_threshold: 0.02,
            high_loss_threshold: 0.1,
            bitrate_threshold: DataRate::zero(),
        }
    }
}

/// Classic loss based controller driven by the loss counters of RTCP
/// receiver reports.
#[derive(Debug, Clone)]
pub struct LossReportBasedBwe {
    config: LossReportBasedBweConfig,
    fraction_loss: u8,
    accumulated_lost_packets: i64,
    accumulated_packets: i64,
    has_decreased_since_last_fraction_loss: bool,
    time_last_fraction_loss_update: Timestamp,
    time_last_decrease: Timestamp,
}

impl Default for LossReportBasedBwe {
    fn default() -> Self {
        Self::new(LossReportBasedBweConfig::default())
    }
}

impl LossReportBasedBwe {
    const MIN_LOSS_REPORT_WINDOW: i64 = 20;
    // Expecting RTCP feedback to be sent uniformly within [0.5, 1.5]s intervals.
    const MAX_RTCP_FEEDBACK_INTERVAL: TimeDelta = TimeDelta::from_millis(5000);
    const BWE_DECREASE_INTERVAL: TimeDelta = TimeDelta::from_millis(300);

    pub fn new(config: LossReportBasedBweConfig) -> Self {
        assert!(config.low_loss_threshold > 0.0 && config.low_loss_threshold <= 1.0);
        assert!(config.high_loss_threshold > 0.0 && config.high_loss_threshold <= 1.0);
        assert!(config.low_loss_threshold <= config.high_loss_threshold);
        Self {
            config,
            fraction_loss: 0,
            accumulated_lost_packets: 0,
            accumulated_packets: 0,
            has_decreased_since_last_fraction_loss: false,
            time_last_fraction_loss_update: Timestamp::minus_infinity(),
            time_last_decrease: Timestamp::minus_infinity(),
        }
    }

    /// Latest loss fraction in Q8.
    pub fn fraction_loss(&self) -> u8 {
        self.fraction_loss
    }

    /// Returns the new loss fraction once enough packets have been reported.
    pub fn on_packets_lost_report(
        &mut self,
        num_packets_lost: i64,
        num_packets: i64,
        report_time: Timestamp,
    ) -> Option<u8> {
        assert!(num_packets >= num_packets_lost);
        self.accumulated_packets += num_packets;
        self.accumulated_lost_packets += num_packets_lost;
        tracing::trace!(num_packets_lost, num_packets, "loss report");

        // Don't generate a loss rate until it can be based on enough packets.
        if self.accumulated_packets < Self::MIN_LOSS_REPORT_WINDOW {
            return None;
        }
        let lost_q8 = self.accumulated_lost_packets.max(0) << 8;
        self.fraction_loss = (lost_q8 / self.accumulated_packets).min(255) as u8;

        // Reset accumulators.
        self.accumulated_lost_packets = 0;
        self.accumulated_packets = 0;
        self.time_last_fraction_loss_update = report_time;
        self.has_decreased_since_last_fraction_loss = false;
        Some(self.fraction_loss)
    }

    /// `min_bitrate` is the lowest target seen over the recent increase
    /// interval, `expected_bitrate` the current target.
    pub fn estimate(
        &mut self,
        min_bitrate: DataRate,
        expected_bitrate: DataRate,
        rtt: TimeDelta,
        at_time: Timestamp,
    ) -> (DataRate, RateControlState) {
        // No loss reports have been received yet.
        if self.time_last_fraction_loss_update.is_infinite() {
            return (expected_bitrate, RateControlState::Hold);
        }

        if !self.is_loss_report_expired(at_time) {
            let loss_ratio = self.fraction_loss as f32 / 256.0;
            // We only make decisions based on loss when the bitrate is above a
            // threshold. This is a crude way of handling loss which is uncorrelated
            // to congestion.
            if expected_bitrate < self.config.bitrate_threshold
                || loss_ratio <= self.config.low_loss_threshold
            {
                // Loss < 2%: Increase rate by 8% of the min bitrate in the last
                // increase interval.
                // Note that by remembering the bitrate over the last second one can
                // rampup up one second faster than if only allowed to start ramping
                // at 8% per second rate now. E.g.:
                //   If sending a constant 100kbps it can rampup immediately to 108kbps
                //   whenever a receiver report is received with lower packet loss.
                //   If instead one would do: current_bitrate *= 1.08^(delta time),
                //   it would take over one second since the lower packet loss to achieve
                //   108kbps.
                let mut new_bitrate =
                    DataRate::from_bits_per_sec((1.08 * min_bitrate.bps_float() + 0.5) as i64);

                // Add 1 kbps extra, just to make sure that we do not get stuck
                // (gives a little extra increase at low rates, negligible at higher
                // rates).
                new_bitrate += DataRate::from_kilobits_per_sec(1);
                return (new_bitrate, RateControlState::Increase);
            } else if expected_bitrate > self.config.bitrate_threshold
                && loss_ratio > self.config.high_loss_threshold
                && !self.has_decreased_since_last_fraction_loss
                && at_time - self.time_last_decrease > Self::BWE_DECREASE_INTERVAL + rtt
            {
                // Loss > 10%: Limit the rate decreases to once a decrease interval
                // plus rtt.
                self.time_last_decrease = at_time;
                // Reduce rate:
                //   new_rate = rate * (1 - 0.5*loss_ratio);
                let new_bitrate =
                    expected_bitrate * ((512 - self.fraction_loss as i64) as f64 / 512.0);
                self.has_decreased_since_last_fraction_loss = true;
                tracing::debug!(
                    ?new_bitrate,
                    fraction_loss = self.fraction_loss,
                    "loss based decrease"
                );
                return (new_bitrate, RateControlState::Decrease);
            }
            // Loss between 2% and 10%, hold.
        }
        // The expected bitrate is kept, yet reported under the decrease label.
        (expected_bitrate, RateControlState::Decrease)
    }

    fn is_loss_report_expired(&self, at_time: Timestamp) -> bool {
        at_time - self.time_last_fraction_loss_update >= 1.2 * Self::MAX_RTCP_FEEDBACK_INTERVAL
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const START: Timestamp = Timestamp::from_millis(100_000);
    const RTT: TimeDelta = TimeDelta::from_millis(100);
    const MIN_BITRATE: DataRate = DataRate::from_kilobits_per_sec(100);
    const EXPECTED_BITRATE: DataRate = DataRate::from_kilobits_per_sec(200);

    #[test]
    fn holds_expected_bitrate_without_reports() {
        let mut bwe = LossReportBasedBwe::default();
        assert_eq!(
            bwe.estimate(MIN_BITRATE, EXPECTED_BITRATE, RTT, START),
            (EXPECTED_BITRATE, RateControlState::Hold)
        );
    }

    #[test]
    fn accumulates_until_enough_packets() {
        let mut bwe = LossReportBasedBwe::default();
        assert_eq!(bwe.on_packets_lost_report(1, 10, START), None);
        assert_eq!(bwe.fraction_loss(), 0);
        // 2 of 20 packets lost, in Q8.
        assert_eq!(bwe.on_packets_lost_report(1, 10, START), Some(25));
        assert_eq!(bwe.fraction_loss(), 25);
    }

    #[test]
    fn fraction_loss_saturates() {
        let mut bwe = LossReportBasedBwe::default();
        assert_eq!(bwe.on_packets_lost_report(20, 20, START), Some(255));
    }

    #[test]
    fn low_loss_increases_from_min_bitrate() {
        let mut bwe = LossReportBasedBwe::default();
        bwe.on_packets_lost_report(0, 20, START);
        assert_eq!(
            bwe.estimate(MIN_BITRATE, EXPECTED_BITRATE, RTT, START),
            (DataRate::from_bits_per_sec(109_000), RateControlState::Increase)
        );
    }

    #[test]
    fn moderate_loss_keeps_expected_bitrate() {
        let mut bwe = LossReportBasedBwe::default();
        // 1 of 20 lost, 5%.
        bwe.on_packets_lost_report(1, 20, START);
        // No decrease happens but the result carries the decrease label.
        assert_eq!(
            bwe.estimate(MIN_BITRATE, EXPECTED_BITRATE, RTT, START),
            (EXPECTED_BITRATE, RateControlState::Decrease)
        );
    }

    #[test]
    fn high_loss_decreases_once_per_report() {
        let mut bwe = LossReportBasedBwe::default();
        // 5 of 20 lost, fraction 64.
        bwe.on_packets_lost_report(5, 20, START);
        assert_eq!(
            bwe.estimate(MIN_BITRATE, EXPECTED_BITRATE, RTT, START),
            (DataRate::from_bits_per_sec(175_000), RateControlState::Decrease)
        );
        let decreased = DataRate::from_bits_per_sec(175_000);
        assert_eq!(
            bwe.estimate(MIN_BITRATE, decreased, RTT, START + TimeDelta::from_seconds(1)),
            (decreased, RateControlState::Decrease)
        );
    }

    #[test]
    fn high_loss_decreases_at_most_once_per_interval() {
        let mut bwe = LossReportBasedBwe::default();
        bwe.on_packets_lost_report(5, 20, START);
        let (decreased, _) = bwe.estimate(MIN_BITRATE, EXPECTED_BITRATE, RTT, START);

        // A new report arrives before the decrease interval plus rtt has passed.
        let now = START + TimeDelta::from_millis(100);
        bwe.on_packets_lost_report(5, 20, now);
        assert_eq!(bwe.estimate(MIN_BITRATE, decreased, RTT, now).0, decreased);

        let now = START + TimeDelta::from_millis(500);
        assert!(bwe.estimate(MIN_BITRATE, decreased, RTT, now).0 < decreased);
    }

    #[test]
    fn expired_report_keeps_expected_bitrate() {
        let mut bwe = LossReportBasedBwe::default();
        bwe.on_packets_lost_report(0, 20, START);
        assert_eq!(
            bwe.estimate(MIN_BITRATE, EXPECTED_BITRATE, RTT, START + TimeDelta::from_seconds(6)),
            (EXPECTED_BITRATE, RateControlState::Decrease)
        );
    }

    #[test]
    #[should_panic]
    fn more_lost_than_sent_panics() {
        let mut bwe = LossReportBasedBwe::default();
        bwe.on_packets_lost_report(5, 4, START);
    }
}

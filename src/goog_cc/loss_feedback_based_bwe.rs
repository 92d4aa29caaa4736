/*
 *  Copyright (c) 2018 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::{
    api::{
        transport::PacketResult,
        units::{DataRate, TimeDelta, Timestamp},
    },
    remote_bitrate_estimator::RateControlState,
};

// WebRTC-Bwe-LossBasedControl
#[derive(Clone, Debug)]
pub struct LossFeedbackBasedBweConfig {
    pub min_increase_factor: f64,                  // min_incr
    pub max_increase_factor: f64,                  // max_incr
    pub increase_low_rtt: TimeDelta,               // incr_low_rtt
    pub increase_high_rtt: TimeDelta,              // incr_high_rtt
    pub decrease_factor: f64,                      // decr
    pub loss_window: TimeDelta,                    // loss_win
    pub loss_max_window: TimeDelta,                // loss_max_win
    pub acknowledged_rate_max_window: TimeDelta,   // ackrate_max_win
    pub increase_offset: DataRate,                 // incr_offset
    pub loss_bandwidth_balance_increase: DataRate, // balance_incr
    pub loss_bandwidth_balance_decrease: DataRate, // balance_decr
    pub loss_bandwidth_balance_reset: DataRate,    // balance_reset
    pub loss_bandwidth_balance_exponent: f64,      // exponent
    pub allow_resets: bool,                        // resets
    pub decrease_interval: TimeDelta,              // decr_intvl
    pub loss_report_timeout: TimeDelta,            // timeout
}

impl Default for LossFeedbackBasedBweConfig {
    fn default() -> Self {
        Self {
            min_increase_factor: 1.02,
            max_increase_factor: 1.08,
            increase_low_rtt: TimeDelta::from_millis(200),
            increase_high_rtt: TimeDelta::from_millis(800),
            decrease_factor: 0.99,
            loss_window: TimeDelta::from_millis(800),
            loss_max_window: TimeDelta::from_millis(800),
            acknowledged_rate_max_window: TimeDelta::from_millis(800),
            increase_offset: DataRate::from_bits_per_sec(1000),
            loss_bandwidth_balance_increase: DataRate::from_kilobits_per_sec_float(0.5),
            loss_bandwidth_balance_decrease: DataRate::from_kilobits_per_sec(4),
            loss_bandwidth_balance_reset: DataRate::from_kilobits_per_sec_float(0.1),
            loss_bandwidth_balance_exponent: 0.5,
            allow_resets: false,
            decrease_interval: TimeDelta::from_millis(300),
            loss_report_timeout: TimeDelta::from_millis(6000),
        }
    }
}

// Estimates an upper BWE limit based on loss.
// It requires knowledge about lost packets and acknowledged bitrate.
// Ie, this class require transport feedback.
#[derive(Debug, Clone)]
pub struct LossFeedbackBasedBwe {
    config: LossFeedbackBasedBweConfig,
    average_loss: f64,
    average_loss_max: f64,
    loss_based_bitrate: DataRate,
    acknowledged_bitrate_max: DataRate,
    acknowledged_bitrate_last_update: Timestamp,
    time_last_decrease: Timestamp,
    has_decreased_since_last_loss_report: bool,
    last_loss_packet_report: Timestamp,
    last_loss_ratio: f64,
}

impl Default for LossFeedbackBasedBwe {
    fn default() -> Self {
        Self::new(LossFeedbackBasedBweConfig::default())
    }
}

impl LossFeedbackBasedBwe {
    // Expecting transport feedback with roughly 1s intervals when nothing
    // else is known.
    const DEFAULT_FEEDBACK_INTERVAL: TimeDelta = TimeDelta::from_seconds(1);

    pub fn new(config: LossFeedbackBasedBweConfig) -> Self {
        assert!(
            config.increase_low_rtt < config.increase_high_rtt,
            "increase_low_rtt must be below increase_high_rtt"
        );
        assert!(config.loss_bandwidth_balance_exponent > 0.0);
        Self {
            config,
            average_loss: 0.0,
            average_loss_max: 0.0,
            loss_based_bitrate: DataRate::zero(),
            acknowledged_bitrate_max: DataRate::zero(),
            acknowledged_bitrate_last_update: Timestamp::minus_infinity(),
            time_last_decrease: Timestamp::minus_infinity(),
            has_decreased_since_last_loss_report: false,
            last_loss_packet_report: Timestamp::minus_infinity(),
            last_loss_ratio: 0.0,
        }
    }

    /// True once any loss statistics have been received.
    pub fn in_use(&self) -> bool {
        self.last_loss_packet_report.is_finite()
    }

    pub fn set_initial_bitrate(&mut self, bitrate: DataRate) {
        self.loss_based_bitrate = bitrate;
        self.average_loss = 0.0;
        self.average_loss_max = 0.0;
    }

    pub fn on_packet_feedbacks(&mut self, packet_results: &[PacketResult], at_time: Timestamp) {
        if packet_results.is_empty() {
            return;
        }
        let loss_count = packet_results.iter().filter(|pkt| pkt.is_lost()).count();
        self.last_loss_ratio = loss_count as f64 / packet_results.len() as f64;
        let time_passed = if self.last_loss_packet_report.is_finite() {
            at_time - self.last_loss_packet_report
        } else {
            Self::DEFAULT_FEEDBACK_INTERVAL
        };
        self.last_loss_packet_report = at_time;
        self.has_decreased_since_last_loss_report = false;

        self.average_loss += exponential_update(self.config.loss_window, time_passed)
            * (self.last_loss_ratio - self.average_loss);
        // The max follows increases of the average immediately and decays
        // towards it otherwise.
        if self.average_loss > self.average_loss_max {
            self.average_loss_max = self.average_loss;
        } else {
            self.average_loss_max += exponential_update(self.config.loss_max_window, time_passed)
                * (self.average_loss - self.average_loss_max);
        }
        tracing::trace!(
            loss_count,
            average_loss = self.average_loss,
            average_loss_max = self.average_loss_max,
            "loss feedback"
        );
    }

    pub fn on_acknowledged_bitrate(&mut self, acknowledged_bitrate: DataRate, at_time: Timestamp) {
        let time_passed = if self.acknowledged_bitrate_last_update.is_finite() {
            at_time - self.acknowledged_bitrate_last_update
        } else {
            Self::DEFAULT_FEEDBACK_INTERVAL
        };
        self.acknowledged_bitrate_last_update = at_time;
        if acknowledged_bitrate > self.acknowledged_bitrate_max {
            self.acknowledged_bitrate_max = acknowledged_bitrate;
        } else {
            self.acknowledged_bitrate_max -=
                exponential_update(self.config.acknowledged_rate_max_window, time_passed)
                    * (self.acknowledged_bitrate_max - acknowledged_bitrate);
        }
    }

    /// Returns the loss based bitrate and the action that produced it.
    pub fn estimate(
        &mut self,
        min_bitrate: DataRate,
        expected_bitrate: DataRate,
        rtt: TimeDelta,
        at_time: Timestamp,
    ) -> (DataRate, RateControlState) {
        if self.loss_based_bitrate.is_zero() {
            self.loss_based_bitrate = expected_bitrate;
        }

        // Only increase if loss has been low for some time.
        let loss_estimate_for_increase = self.average_loss_max;
        // Avoid multiple decreases from averaging over one loss spike.
        let loss_estimate_for_decrease = self.average_loss.min(self.last_loss_ratio);
        let allow_decrease = !self.has_decreased_since_last_loss_report
            && (at_time - self.time_last_decrease >= rtt + self.config.decrease_interval);
        // If packet lost reports are too old, dont increase bitrate.
        let loss_report_valid =
            at_time - self.last_loss_packet_report < self.config.loss_report_timeout;

        let mut state = RateControlState::Hold;
        if loss_report_valid
            && self.config.allow_resets
            && loss_estimate_for_increase < self.loss_reset_threshold()
        {
            self.loss_based_bitrate = expected_bitrate;
            tracing::debug!(bitrate = ?expected_bitrate, "loss based estimate reset");
        } else if loss_report_valid && loss_estimate_for_increase < self.loss_increase_threshold() {
            // Increase bitrate by RTT-adaptive ratio.
            let new_increased_bitrate = min_bitrate * self.increase_factor(rtt)
                + self.config.increase_offset;
            // The bitrate that would make the loss "just high enough".
            let new_increased_bitrate_cap = bitrate_from_loss(
                loss_estimate_for_increase,
                self.config.loss_bandwidth_balance_increase,
                self.config.loss_bandwidth_balance_exponent,
            );
            let new_increased_bitrate = new_increased_bitrate.min(new_increased_bitrate_cap);
            self.loss_based_bitrate = new_increased_bitrate.max(self.loss_based_bitrate);
            state = RateControlState::Increase;
        } else if loss_estimate_for_decrease > self.loss_decrease_threshold() && allow_decrease {
            // The bitrate that would make the loss "just acceptable".
            let new_decreased_bitrate_floor = bitrate_from_loss(
                loss_estimate_for_decrease,
                self.config.loss_bandwidth_balance_decrease,
                self.config.loss_bandwidth_balance_exponent,
            );
            let new_decreased_bitrate = (self.config.decrease_factor
                * self.acknowledged_bitrate_max)
                .max(new_decreased_bitrate_floor);
            if new_decreased_bitrate < self.loss_based_bitrate {
                self.time_last_decrease = at_time;
                self.has_decreased_since_last_loss_report = true;
                self.loss_based_bitrate = new_decreased_bitrate;
            }
            state = RateControlState::Decrease;
            tracing::debug!(bitrate = ?self.loss_based_bitrate, "loss based decrease");
        }
        (self.loss_based_bitrate, state)
    }

    // Increase slower when RTT is high.
    fn increase_factor(&self, rtt: TimeDelta) -> f64 {
        let config = &self.config;
        let rtt = rtt.clamped(config.increase_low_rtt, config.increase_high_rtt);
        let rtt_range = config.increase_high_rtt - config.increase_low_rtt;
        let rtt_offset = rtt - config.increase_low_rtt;
        let relative_offset = (rtt_offset / rtt_range).clamp(0.0, 1.0);
        let factor_range = config.max_increase_factor - config.min_increase_factor;
        config.min_increase_factor + (1.0 - relative_offset) * factor_range
    }

    fn loss_increase_threshold(&self) -> f64 {
        loss_from_bitrate(
            self.loss_based_bitrate,
            self.config.loss_bandwidth_balance_increase,
            self.config.loss_bandwidth_balance_exponent,
        )
    }

    fn loss_decrease_threshold(&self) -> f64 {
        loss_from_bitrate(
            self.loss_based_bitrate,
            self.config.loss_bandwidth_balance_decrease,
            self.config.loss_bandwidth_balance_exponent,
        )
    }

    fn loss_reset_threshold(&self) -> f64 {
        loss_from_bitrate(
            self.loss_based_bitrate,
            self.config.loss_bandwidth_balance_reset,
            self.config.loss_bandwidth_balance_exponent,
        )
    }
}

fn loss_from_bitrate(bitrate: DataRate, loss_bandwidth_balance: DataRate, exponent: f64) -> f64 {
    if loss_bandwidth_balance >= bitrate {
        return 1.0;
    }
    (loss_bandwidth_balance / bitrate).powf(exponent)
}

fn bitrate_from_loss(loss: f64, loss_bandwidth_balance: DataRate, exponent: f64) -> DataRate {
    if exponent <= 0.0 || loss < 1e-5 {
        return DataRate::infinity();
    }
    loss_bandwidth_balance * loss.powf(-1.0 / exponent)
}

// Use the convention that exponential window length (which is really
// infinite) is the time it takes to dampen to 1/e.
fn exponential_update(window: TimeDelta, interval: TimeDelta) -> f64 {
    if window <= TimeDelta::zero() {
        return 1.0;
    }
    1.0 - (interval / window * -1.0).exp()
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use crate::api::transport::SentPacket;

    use super::*;

    const START: Timestamp = Timestamp::from_millis(100_000);
    const RTT: TimeDelta = TimeDelta::from_millis(100);

    fn feedback(num_packets: i64, num_lost: i64) -> Vec<PacketResult> {
        (0..num_packets)
            .map(|i| PacketResult {
                sent_packet: SentPacket {
                    packet_id: i,
                    ..Default::default()
                },
                recv_time: if i < num_lost {
                    Timestamp::plus_infinity()
                } else {
                    START
                },
            })
            .collect()
    }

    #[test]
    fn in_use_after_feedback() {
        let mut bwe = LossFeedbackBasedBwe::default();
        assert!(!bwe.in_use());
        bwe.on_packet_feedbacks(&[], START);
        assert!(!bwe.in_use());
        bwe.on_packet_feedbacks(&feedback(10, 0), START);
        assert!(bwe.in_use());
    }

    #[test]
    fn increases_without_loss() {
        let mut bwe = LossFeedbackBasedBwe::default();
        bwe.on_packet_feedbacks(&feedback(10, 0), START);
        let min_bitrate = DataRate::from_kilobits_per_sec(300);
        // Low rtt gives the max increase factor.
        assert_eq!(
            bwe.estimate(min_bitrate, min_bitrate, RTT, START),
            (DataRate::from_bits_per_sec(325_000), RateControlState::Increase)
        );
    }

    #[test]
    fn repeated_estimate_is_stable() {
        let mut bwe = LossFeedbackBasedBwe::default();
        bwe.on_packet_feedbacks(&feedback(10, 0), START);
        let min_bitrate = DataRate::from_kilobits_per_sec(300);
        let first = bwe.estimate(min_bitrate, min_bitrate, RTT, START);
        let second = bwe.estimate(min_bitrate, min_bitrate, RTT, START);
        assert_eq!(first, second);
    }

    #[test]
    fn higher_rtt_increases_slower() {
        let min_bitrate = DataRate::from_kilobits_per_sec(300);
        let mut low = LossFeedbackBasedBwe::default();
        let mut high = LossFeedbackBasedBwe::default();
        low.on_packet_feedbacks(&feedback(10, 0), START);
        high.on_packet_feedbacks(&feedback(10, 0), START);
        let (low_rtt_bitrate, _) = low.estimate(min_bitrate, min_bitrate, RTT, START);
        let (high_rtt_bitrate, _) =
            high.estimate(min_bitrate, min_bitrate, TimeDelta::from_seconds(1), START);
        // 1.02 * 300 kbps + 1 kbps.
        assert_eq!(high_rtt_bitrate, DataRate::from_bits_per_sec(307_000));
        assert!(high_rtt_bitrate < low_rtt_bitrate);
    }

    #[test]
    fn decreases_once_per_feedback() {
        let mut bwe = LossFeedbackBasedBwe::default();
        bwe.on_acknowledged_bitrate(DataRate::from_kilobits_per_sec(500), START);
        bwe.on_packet_feedbacks(&feedback(10, 5), START);
        let min_bitrate = DataRate::from_kilobits_per_sec(300);
        let expected = DataRate::from_kilobits_per_sec(600);

        assert_eq!(
            bwe.estimate(min_bitrate, expected, RTT, START),
            (DataRate::from_bits_per_sec(495_000), RateControlState::Decrease)
        );
        assert_eq!(
            bwe.estimate(min_bitrate, expected, RTT, START),
            (DataRate::from_bits_per_sec(495_000), RateControlState::Hold)
        );
    }

    #[test]
    fn resets_to_expected_when_allowed() {
        let config = LossFeedbackBasedBweConfig {
            allow_resets: true,
            ..Default::default()
        };
        let mut bwe = LossFeedbackBasedBwe::new(config);
        bwe.set_initial_bitrate(DataRate::from_kilobits_per_sec(300));
        bwe.on_packet_feedbacks(&feedback(10, 0), START);
        let expected = DataRate::from_kilobits_per_sec(800);
        assert_eq!(
            bwe.estimate(DataRate::from_kilobits_per_sec(100), expected, RTT, START),
            (expected, RateControlState::Hold)
        );
    }

    #[test]
    fn stale_feedback_holds() {
        let mut bwe = LossFeedbackBasedBwe::default();
        let initial = DataRate::from_kilobits_per_sec(300);
        bwe.set_initial_bitrate(initial);
        bwe.on_packet_feedbacks(&feedback(10, 0), START);
        assert_eq!(
            bwe.estimate(
                DataRate::from_kilobits_per_sec(500),
                DataRate::from_kilobits_per_sec(500),
                RTT,
                START + TimeDelta::from_seconds(6)
            ),
            (initial, RateControlState::Hold)
        );
    }

    #[test]
    fn acknowledged_bitrate_max_decays() {
        let mut bwe = LossFeedbackBasedBwe::default();
        bwe.on_acknowledged_bitrate(DataRate::from_kilobits_per_sec(500), START);
        bwe.on_acknowledged_bitrate(
            DataRate::from_kilobits_per_sec(100),
            START + TimeDelta::from_millis(800),
        );
        // One window dampens the difference to 1/e.
        let expected_kbps = 100.0 + 400.0 * (-1.0f64).exp();
        assert_relative_eq!(
            bwe.acknowledged_bitrate_max.kbps_float(),
            expected_kbps,
            epsilon = 0.01
        );
    }

    #[test]
    fn loss_and_bitrate_conversions() {
        let balance = DataRate::from_kilobits_per_sec(4);
        assert_eq!(loss_from_bitrate(balance, balance, 0.5), 1.0);
        assert_relative_eq!(
            loss_from_bitrate(DataRate::from_kilobits_per_sec(400), balance, 0.5),
            0.1,
            epsilon = 1e-9
        );
        assert!(bitrate_from_loss(0.0, balance, 0.5).is_infinite());
        assert_eq!(
            bitrate_from_loss(0.1, balance, 0.5),
            DataRate::from_kilobits_per_sec(400)
        );
    }

    #[test]
    #[should_panic]
    fn misconfigured_rtt_range_panics() {
        let config = LossFeedbackBasedBweConfig {
            increase_low_rtt: TimeDelta::from_millis(800),
            increase_high_rtt: TimeDelta::from_millis(200),
            ..Default::default()
        };
        LossFeedbackBasedBwe::new(config);
    }
}

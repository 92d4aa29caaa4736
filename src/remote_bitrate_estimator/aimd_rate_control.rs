/*
 *  Copyright (c) 2014 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::{
    api::{
        transport::BandwidthUsage,
        units::{DataRate, DataSize, TimeDelta, Timestamp},
    },
    goog_cc::LinkCapacityEstimator,
};

use super::{RateControlState, BITRATE_WINDOW, CONGESTION_CONTROLLER_MIN_BITRATE};

#[derive(Debug, Clone)]
pub struct AimdRateControlConfig {
    pub min_bitrate: DataRate,                       // min
    pub max_bitrate: DataRate,                       // max
    pub backoff_factor: f64,                         // WebRTC-BweBackOffFactor/Enabled-*
    pub no_bitrate_increase_in_alr: bool,            // WebRTC-DontIncreaseDelayBasedBweInAlr
    pub initial_backoff_interval: Option<TimeDelta>, // WebRTC-BweInitialBackOffInterval/interval
    pub link_capacity_fix: bool,                     // WebRTC-Bwe-LinkCapacityFix
}

impl Default for AimdRateControlConfig {
    fn default() -> Self {
        Self {
            min_bitrate: CONGESTION_CONTROLLER_MIN_BITRATE,
            max_bitrate: DataRate::from_kilobits_per_sec(30_000),
            backoff_factor: Self::DEFAULT_BACKOFF_FACTOR,
            no_bitrate_increase_in_alr: false,
            initial_backoff_interval: None,
            link_capacity_fix: false,
        }
    }
}

impl AimdRateControlConfig {
    const DEFAULT_BACKOFF_FACTOR: f64 = 0.85;

    pub fn validate(&mut self) {
        if self.backoff_factor >= 1.0 {
            tracing::warn!("Back-off factor must be less than 1.");
        } else if self.backoff_factor <= 0.0 {
            tracing::warn!("Back-off factor must be greater than 0.");
        } else {
            return;
        }

        tracing::warn!("Invalid back-off factor for AimdRateControl. Using default.");
        self.backoff_factor = Self::DEFAULT_BACKOFF_FACTOR
    }
}

// A rate control implementation based on additive increases of
// bitrate when no over-use is detected and multiplicative decreases when
// over-uses are detected. When we think the available bandwidth has changes or
// is unknown, we will switch to a "slow-start mode" where we increase
// multiplicatively.
#[derive(Debug, Clone)]
pub struct AimdRateControl {
    config: AimdRateControlConfig,
    min_configured_bitrate: DataRate,
    current_bitrate: DataRate,
    latest_estimated_throughput: DataRate,
    link_capacity: LinkCapacityEstimator,
    rate_control_state: RateControlState,
    time_last_bitrate_change: Timestamp,
    time_last_bitrate_decrease: Timestamp,
    time_first_throughput_estimate: Timestamp,
    bitrate_is_initialized: bool,
    in_alr: bool,
    rtt: TimeDelta,
    send_side: bool,
    last_decrease: Option<DataRate>,
}

impl Default for AimdRateControl {
    fn default() -> Self {
        Self::new(AimdRateControlConfig::default(), false)
    }
}

impl AimdRateControl {
    const DEFAULT_RTT: TimeDelta = TimeDelta::from_millis(200);

    pub fn new(mut config: AimdRateControlConfig, send_side: bool) -> Self {
        config.validate();
        tracing::info!(
            "Using aimd rate control with back off factor {}",
            config.backoff_factor
        );

        Self {
            min_configured_bitrate: config.min_bitrate,
            current_bitrate: config.max_bitrate,
            latest_estimated_throughput: config.max_bitrate,
            link_capacity: LinkCapacityEstimator::new(),
            rate_control_state: RateControlState::Hold,
            time_last_bitrate_change: Timestamp::minus_infinity(),
            time_last_bitrate_decrease: Timestamp::minus_infinity(),
            time_first_throughput_estimate: Timestamp::minus_infinity(),
            bitrate_is_initialized: false,
            in_alr: false,
            rtt: Self::DEFAULT_RTT,
            send_side,
            last_decrease: None,
            config,
        }
    }

    // Returns true if the target bitrate has been initialized. This happens
    // either if it has been explicitly set via set_start_bitrate/set_estimate, or
    // if we have measured a throughput.
    pub fn valid_estimate(&self) -> bool {
        self.bitrate_is_initialized
    }

    pub fn set_start_bitrate(&mut self, start_bitrate: DataRate) {
        self.current_bitrate = self.clamp_bitrate(start_bitrate);
        self.latest_estimated_throughput = self.current_bitrate;
        self.bitrate_is_initialized = true;
    }

    pub fn set_min_bitrate(&mut self, min_bitrate: DataRate) {
        self.min_configured_bitrate = min_bitrate;
        self.current_bitrate = self.current_bitrate.max(min_bitrate);
    }

    pub fn get_feedback_interval(&self) -> TimeDelta {
        // Estimate how often we can send RTCP if we allocate up to 5% of bandwidth
        // to feedback.
        const RTCP_SIZE: DataSize = DataSize::from_bytes(80);
        const MIN_FEEDBACK_INTERVAL: TimeDelta = TimeDelta::from_millis(200);
        const MAX_FEEDBACK_INTERVAL: TimeDelta = TimeDelta::from_millis(1000);
        let rtcp_bitrate = self.current_bitrate * 0.05;
        (RTCP_SIZE / rtcp_bitrate).clamped(MIN_FEEDBACK_INTERVAL, MAX_FEEDBACK_INTERVAL)
    }

    /// Returns true if the bitrate estimate hasn't been changed for more than
    /// an RTT, or if the estimated throughput is less than half of the current
    /// estimate. Used to decide whether to reduce the rate further when
    /// over-using.
    pub fn can_reduce_further(&self, at_time: Timestamp, estimated_throughput: DataRate) -> bool {
        let bitrate_reduction_interval = self
            .rtt
            .clamped(TimeDelta::from_millis(10), TimeDelta::from_millis(200));
        if at_time - self.time_last_bitrate_change >= bitrate_reduction_interval {
            return true;
        }
        if self.valid_estimate() {
            let threshold = 0.5 * self.latest_estimate();
            return estimated_throughput < threshold;
        }
        false
    }

    /// As above, to be used when over-using before a throughput is measured.
    pub fn can_reduce_further_in_start_phase(&self, at_time: Timestamp) -> bool {
        match self.config.initial_backoff_interval {
            Some(interval) => {
                self.time_last_bitrate_decrease.is_infinite()
                    || at_time - self.time_last_bitrate_decrease >= interval
            }
            None => {
                self.valid_estimate()
                    && self.can_reduce_further(
                        at_time,
                        self.latest_estimate() / 2i64 - DataRate::from_bits_per_sec(1),
                    )
            }
        }
    }

    pub fn latest_estimate(&self) -> DataRate {
        self.current_bitrate
    }

    pub fn set_rtt(&mut self, rtt: TimeDelta) {
        self.rtt = rtt;
    }

    pub fn update(
        &mut self,
        bw_state: BandwidthUsage,
        estimated_throughput: Option<DataRate>,
        at_time: Timestamp,
    ) -> DataRate {
        // Initialize the bitrate with what we have been receiving for a while.
        if !self.bitrate_is_initialized {
            const INITIALIZATION_TIME: TimeDelta = TimeDelta::from_seconds(5);
            debug_assert!(BITRATE_WINDOW <= INITIALIZATION_TIME);

            if let Some(estimated_throughput) = estimated_throughput {
                if self.time_first_throughput_estimate.is_infinite() {
                    self.time_first_throughput_estimate = at_time;
                } else if at_time - self.time_first_throughput_estimate > INITIALIZATION_TIME {
                    self.current_bitrate = self.clamp_bitrate(estimated_throughput);
                    self.bitrate_is_initialized = true;
                }
            }
        }

        self.change_bitrate(bw_state, estimated_throughput, at_time);
        self.current_bitrate
    }

    pub fn set_in_application_limited_region(&mut self, in_alr: bool) {
        self.in_alr = in_alr;
    }

    pub fn set_estimate(&mut self, bitrate: DataRate, at_time: Timestamp) {
        self.bitrate_is_initialized = true;
        let prev_bitrate = self.current_bitrate;
        self.current_bitrate = self.clamp_bitrate(bitrate);
        self.time_last_bitrate_change = at_time;
        if self.current_bitrate < prev_bitrate {
            self.time_last_bitrate_decrease = at_time;
        }
    }

    // Returns the increase rate when used bandwidth is near the link capacity.
    pub fn get_near_max_increase_rate_bps_per_second(&self) -> f64 {
        assert!(!self.current_bitrate.is_zero());
        let frame_interval = TimeDelta::from_seconds_float(1.0 / 30.0);
        let frame_size = self.current_bitrate * frame_interval;
        const PACKET_SIZE: DataSize = DataSize::from_bytes(1200);
        let packets_per_frame = (frame_size / PACKET_SIZE).ceil();
        let avg_packet_size = frame_size / packets_per_frame;

        // Approximate the over-use estimator delay to 100 ms, doubled since the
        // detector threshold adapts.
        let response_time = (self.rtt + TimeDelta::from_millis(100)) * 2i64;
        let increase_rate_bps_per_second = (avg_packet_size / response_time).bps_float();
        const MIN_INCREASE_RATE_BPS_PER_SECOND: f64 = 4000.0;
        increase_rate_bps_per_second.max(MIN_INCREASE_RATE_BPS_PER_SECOND)
    }

    // Returns the expected time between overuse signals (assuming steady state).
    pub fn get_expected_bandwidth_period(&self) -> TimeDelta {
        const MIN_PERIOD: TimeDelta = TimeDelta::from_seconds(2);
        const DEFAULT_PERIOD: TimeDelta = TimeDelta::from_seconds(3);
        const MAX_PERIOD: TimeDelta = TimeDelta::from_seconds(50);

        let Some(last_decrease) = self.last_decrease else {
            return DEFAULT_PERIOD;
        };
        let time_to_recover_decrease_seconds =
            last_decrease.bps_float() / self.get_near_max_increase_rate_bps_per_second();
        TimeDelta::from_seconds_float(time_to_recover_decrease_seconds)
            .clamped(MIN_PERIOD, MAX_PERIOD)
    }

    pub fn state(&self) -> RateControlState {
        self.rate_control_state
    }

    // Update the target bitrate based on, among other things, the current rate
    // control state, the current target bitrate and the estimated throughput.
    // When in the "increase" state the bitrate will be increased either
    // additively or multiplicatively depending on the rate control region. When
    // in the "decrease" state the bitrate will be decreased to slightly below the
    // current throughput. When in the "hold" state the bitrate will be kept
    // constant to allow built up queues to drain.
    fn change_bitrate(
        &mut self,
        bw_state: BandwidthUsage,
        measured_throughput: Option<DataRate>,
        at_time: Timestamp,
    ) {
        let mut new_bitrate: Option<DataRate> = None;
        let estimated_throughput = measured_throughput.unwrap_or(self.latest_estimated_throughput);
        if let Some(measured_throughput) = measured_throughput {
            self.latest_estimated_throughput = measured_throughput;
        }

        // An over-use should always trigger us to reduce the bitrate, even though
        // we have not yet established our first estimate. By acting on the over-use,
        // we will end up with a valid estimate.
        if !self.bitrate_is_initialized && bw_state != BandwidthUsage::Overusing {
            return;
        }

        self.change_state(bw_state, at_time);

        match self.rate_control_state {
            RateControlState::Hold => (),
            RateControlState::Increase => {
                if self
                    .link_capacity
                    .upper_bound()
                    .is_some_and(|upper| estimated_throughput > upper)
                {
                    self.link_capacity.reset();
                }

                // We limit the new bitrate based on the troughput to avoid unlimited
                // bitrate increases. We allow a bit more lag at very low rates to not too
                // easily get stuck if the encoder produces uneven outputs.
                let mut increase_limit =
                    1.5 * estimated_throughput + DataRate::from_kilobits_per_sec(10);
                if self.send_side && self.in_alr && self.config.no_bitrate_increase_in_alr {
                    // Do not increase the delay based estimate in alr since the estimator
                    // will not be able to get transport feedback necessary to detect if
                    // the new estimate is correct.
                    // If we have previously increased above the limit (for instance due to
                    // probing), we don't allow further changes.
                    increase_limit = self.current_bitrate;
                }

                if self.current_bitrate < increase_limit {
                    let increased_bitrate = if self.link_capacity.has_estimate() {
                        // The link_capacity estimate is reset if the measured throughput
                        // is too far from the estimate. We can therefore assume that our
                        // target rate is reasonably close to link capacity and use additive
                        // increase.
                        self.current_bitrate
                            + self.additive_rate_increase(at_time, self.time_last_bitrate_change)
                    } else {
                        // If we don't have an estimate of the link capacity, use faster ramp
                        // up to discover the capacity.
                        self.current_bitrate
                            + self.multiplicative_rate_increase(
                                at_time,
                                self.time_last_bitrate_change,
                                self.current_bitrate,
                            )
                    };
                    new_bitrate = Some(increased_bitrate.min(increase_limit));
                }
                self.time_last_bitrate_change = at_time;
            }
            RateControlState::Decrease => {
                // Set bit rate to something slightly lower than the measured throughput
                // to get rid of any self-induced delay.
                let mut decreased_bitrate = estimated_throughput * self.config.backoff_factor;
                if decreased_bitrate > DataRate::from_kilobits_per_sec(5) {
                    decreased_bitrate -= DataRate::from_kilobits_per_sec(5);
                }

                if decreased_bitrate > self.current_bitrate && !self.config.link_capacity_fix {
                    // TODO(terelius): The link_capacity estimate may be based on old
                    // throughput measurements. Relying on them may lead to unnecessary
                    // BWE drops.
                    if let Some(link_capacity) = self.link_capacity.estimate() {
                        decreased_bitrate = self.config.backoff_factor * link_capacity;
                    }
                }
                // Avoid increasing the rate when over-using.
                if decreased_bitrate < self.current_bitrate {
                    new_bitrate = Some(decreased_bitrate);
                }

                if self.bitrate_is_initialized && estimated_throughput < self.current_bitrate {
                    self.last_decrease = Some(match new_bitrate {
                        Some(new_bitrate) => self.current_bitrate - new_bitrate,
                        None => DataRate::zero(),
                    });
                }
                if self
                    .link_capacity
                    .lower_bound()
                    .is_some_and(|lower| estimated_throughput < lower)
                {
                    // The current throughput is far from the estimated link capacity. Clear
                    // the estimate to allow an immediate update in on_overuse_detected.
                    self.link_capacity.reset();
                }

                self.bitrate_is_initialized = true;
                self.link_capacity.on_overuse_detected(estimated_throughput);
                // Stay on hold until the pipes are cleared.
                self.rate_control_state = RateControlState::Hold;
                self.time_last_bitrate_change = at_time;
                self.time_last_bitrate_decrease = at_time;
            }
        };

        self.current_bitrate = self.clamp_bitrate(new_bitrate.unwrap_or(self.current_bitrate));
    }

    fn clamp_bitrate(&self, new_bitrate: DataRate) -> DataRate {
        new_bitrate
            .min(self.config.max_bitrate)
            .max(self.min_configured_bitrate)
    }

    fn multiplicative_rate_increase(
        &self,
        at_time: Timestamp,
        last_time: Timestamp,
        current_bitrate: DataRate,
    ) -> DataRate {
        let mut alpha: f64 = 1.08;
        if last_time.is_finite() {
            let time_since_last_update = at_time - last_time;
            alpha = alpha.powf(time_since_last_update.seconds_float().min(1.0));
        }
        (current_bitrate * (alpha - 1.0)).max(DataRate::from_bits_per_sec(1000))
    }

    fn additive_rate_increase(&self, at_time: Timestamp, last_time: Timestamp) -> DataRate {
        let time_period_seconds = (at_time - last_time).seconds_float();
        let data_rate_increase_bps =
            self.get_near_max_increase_rate_bps_per_second() * time_period_seconds;
        DataRate::from_bits_per_sec_float(data_rate_increase_bps)
    }

    // Over-use moves any state to Decrease, under-use to Hold, and a normal
    // signal starts increasing only from Hold.
    fn change_state(&mut self, bw_state: BandwidthUsage, at_time: Timestamp) {
        match bw_state {
            BandwidthUsage::Normal => {
                if self.rate_control_state == RateControlState::Hold {
                    self.time_last_bitrate_change = at_time;
                    self.rate_control_state = RateControlState::Increase;
                }
            }
            BandwidthUsage::Overusing => {
                self.rate_control_state = RateControlState::Decrease;
            }
            BandwidthUsage::Underusing => {
                self.rate_control_state = RateControlState::Hold;
            }
        }
    }
}

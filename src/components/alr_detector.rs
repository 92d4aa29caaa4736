/*
 *  Copyright (c) 2016 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::{
    api::units::{DataRate, DataSize, Timestamp},
    pacing::IntervalBudget,
};

// WebRTC-AlrDetectorParameters
#[derive(Clone, Debug)]
pub struct AlrDetectorConfig {
    // Sent traffic ratio as a function of network capacity used to determine
    // the application limited region. ALR starts when bandwidth usage drops
    // below the start level and ends when it rises above the stop level.
    pub bandwidth_usage_ratio: f64,
    pub start_budget_level_ratio: f64,
    pub stop_budget_level_ratio: f64,
}

impl Default for AlrDetectorConfig {
    fn default() -> Self {
        Self {
            bandwidth_usage_ratio: 0.65,
            start_budget_level_ratio: 0.80,
            stop_budget_level_ratio: 0.50,
        }
    }
}

/// Uses elapsed time and bytes sent to tell whether the traffic is currently
/// limited by how much the application produces rather than by the network.
#[derive(Debug)]
pub struct AlrDetector {
    config: AlrDetectorConfig,
    last_send_time: Option<Timestamp>,
    alr_budget: IntervalBudget,
    alr_started_time: Option<Timestamp>,
    alr_ended_time: Option<Timestamp>,
}

impl Default for AlrDetector {
    fn default() -> Self {
        Self::new(AlrDetectorConfig::default())
    }
}

impl AlrDetector {
    pub fn new(config: AlrDetectorConfig) -> Self {
        Self {
            config,
            last_send_time: None,
            alr_budget: IntervalBudget::new(DataRate::zero(), true),
            alr_started_time: None,
            alr_ended_time: None,
        }
    }

    pub fn on_bytes_sent(&mut self, bytes_sent: DataSize, send_time: Timestamp) {
        let Some(last_send_time) = self.last_send_time.replace(send_time) else {
            // The time it took to send these bytes is unknown.
            return;
        };

        self.alr_budget.use_budget(bytes_sent);
        self.alr_budget.increase_budget(send_time - last_send_time);

        let budget_ratio = self.alr_budget.budget_ratio();
        if self.alr_started_time.is_none() && budget_ratio > self.config.start_budget_level_ratio {
            tracing::debug!(budget_ratio, "application limited region started");
            self.alr_started_time = Some(send_time);
        } else if self.alr_started_time.is_some()
            && budget_ratio < self.config.stop_budget_level_ratio
        {
            tracing::debug!(budget_ratio, "application limited region ended");
            self.alr_started_time = None;
            self.alr_ended_time = Some(send_time);
        }
    }

    /// Sets the current estimated bandwidth.
    pub fn set_target_bitrate(&mut self, target_bitrate: DataRate) {
        debug_assert!(target_bitrate > DataRate::zero());
        self.alr_budget
            .set_target_rate(target_bitrate * self.config.bandwidth_usage_ratio);
    }

    pub fn in_alr(&self) -> bool {
        self.alr_started_time.is_some()
    }

    /// When the current application limited region started, `None` while the
    /// sender is not application limited.
    pub fn alr_started_time(&self) -> Option<Timestamp> {
        self.alr_started_time
    }

    pub fn alr_ended_time(&self) -> Option<Timestamp> {
        self.alr_ended_time
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::units::TimeDelta;
    use test_trace::test;

    const WINDOW: TimeDelta = TimeDelta::from_millis(500);
    const TARGET_BITRATE: DataRate = DataRate::from_kilobits_per_sec(300);
    const TIME_STEP: TimeDelta = TimeDelta::from_millis(10);

    struct Harness {
        now: Timestamp,
        detector: AlrDetector,
    }

    impl Harness {
        fn new(config: AlrDetectorConfig) -> Self {
            let mut detector = AlrDetector::new(config);
            detector.set_target_bitrate(TARGET_BITRATE);
            Self {
                now: Timestamp::from_seconds(1),
                detector,
            }
        }

        fn produce_traffic(&mut self, interval: TimeDelta, usage_ratio: f64) {
            let bytes_per_step = TARGET_BITRATE * usage_ratio * TIME_STEP;
            let end_time = self.now + interval;
            while self.now <= end_time {
                self.now += TIME_STEP;
                self.detector.on_bytes_sent(bytes_per_step, self.now);
            }
        }
    }

    #[test]
    fn alr_detection() {
        let mut harness = Harness::new(AlrDetectorConfig::default());
        assert!(!harness.detector.in_alr());

        // Stays out of ALR when usage is close to 100%.
        harness.produce_traffic(WINDOW, 0.9);
        assert!(!harness.detector.in_alr());

        // ALR starts when usage drops below 20%.
        harness.produce_traffic(WINDOW * 2i64, 0.2);
        assert!(harness.detector.in_alr());
        let started = harness.detector.alr_started_time();
        assert!(started.is_some());

        // ALR ends when usage is above 65%.
        harness.produce_traffic(WINDOW * 2i64, 0.98);
        assert!(!harness.detector.in_alr());
        assert!(harness.detector.alr_ended_time() > started);
    }

    #[test]
    fn short_spike() {
        let mut harness = Harness::new(AlrDetectorConfig::default());
        harness.produce_traffic(WINDOW * 2i64, 0.2);
        assert!(harness.detector.in_alr());

        // A 100 ms spike doesn't end ALR.
        harness.produce_traffic(WINDOW / 5i64, 1.5);
        assert!(harness.detector.in_alr());

        harness.produce_traffic(WINDOW * 2i64, 0.95);
        assert!(!harness.detector.in_alr());
    }

    #[test]
    fn bandwidth_estimate_changes() {
        let mut harness = Harness::new(AlrDetectorConfig::default());
        harness.produce_traffic(WINDOW * 2i64, 0.2);
        assert!(harness.detector.in_alr());

        // A lower estimate alone keeps us in ALR, the same traffic against the
        // lower estimate ends it so the probe controller can react to the drop.
        harness.detector.set_target_bitrate(TARGET_BITRATE * 0.5);
        assert!(harness.detector.in_alr());
        harness.produce_traffic(WINDOW * 2i64, 0.5);
        assert!(!harness.detector.in_alr());
    }

    #[test]
    fn configured_thresholds() {
        let mut harness = Harness::new(AlrDetectorConfig {
            bandwidth_usage_ratio: 0.9,
            start_budget_level_ratio: 0.0,
            stop_budget_level_ratio: -0.1,
        });

        // Using 10% more than the usage ratio allows never starts ALR.
        harness.produce_traffic(WINDOW * 2i64, 1.0);
        assert!(!harness.detector.in_alr());

        // At 85% the budget recovers to 0% in about 2 s.
        harness.produce_traffic(TimeDelta::from_millis(2100), 0.85);
        assert!(harness.detector.in_alr());
    }
}

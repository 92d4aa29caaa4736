/*
 *  Copyright (c) 2017 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::api::units::{DataRate, DataSize, TimeDelta, Timestamp};

#[derive(Clone, Debug)]
pub struct ThroughputEstimatorConfig {
    pub initial_window: TimeDelta,             // initial_window_ms
    pub noninitial_window: TimeDelta,          // window_ms
    pub uncertainty_scale: f64,                // scale
    pub uncertainty_scale_in_alr: f64,         // scale_alr
    pub small_sample_uncertainty_scale: f64,   // scale_small
    pub small_sample_threshold: DataSize,      // small_thresh
    pub uncertainty_symmetry_cap: DataRate,    // symmetry_cap
    pub estimate_floor: DataRate,              // floor
}

impl Default for ThroughputEstimatorConfig {
    fn default() -> Self {
        Self {
            initial_window: TimeDelta::from_millis(500),
            noninitial_window: TimeDelta::from_millis(150),
            uncertainty_scale: 10.0,
            uncertainty_scale_in_alr: 10.0,
            small_sample_uncertainty_scale: 10.0,
            small_sample_threshold: DataSize::zero(),
            uncertainty_symmetry_cap: DataRate::zero(),
            estimate_floor: DataRate::zero(),
        }
    }
}

/// Source of throughput estimates fed with acknowledged bytes.
pub trait ThroughputEstimatorInterface {
    fn update(&mut self, at_time: Timestamp, amount: DataSize, in_alr: bool);
    fn estimate(&self) -> Option<DataRate>;
    fn peek_rate(&self) -> Option<DataRate>;
    fn expect_fast_rate_change(&mut self);
}

// Computes a bayesian estimate of the throughput given acks containing
// the arrival time and payload size. Samples which are far from the current
// estimate or are based on few packets are given a smaller weight, as they
// are considered to be more likely to have been caused by, e.g., delay spikes
// unrelated to congestion.
#[derive(Clone, Debug)]
pub struct ThroughputEstimator {
    config: ThroughputEstimatorConfig,
    accumulated_bytes: i64,
    current_window_ms: i64,
    prev_time_ms: Option<i64>,
    bitrate_estimate_kbps: Option<f64>,
    bitrate_estimate_var: f64,
}

impl ThroughputEstimator {
    const MIN_RATE_WINDOW: TimeDelta = TimeDelta::from_millis(150);
    const MAX_RATE_WINDOW: TimeDelta = TimeDelta::from_millis(1000);

    pub fn new(config: ThroughputEstimatorConfig) -> Self {
        let window_range = Self::MIN_RATE_WINDOW..=Self::MAX_RATE_WINDOW;
        assert!(window_range.contains(&config.initial_window));
        assert!(window_range.contains(&config.noninitial_window));
        Self {
            config,
            accumulated_bytes: 0,
            current_window_ms: 0,
            prev_time_ms: None,
            bitrate_estimate_kbps: None,
            bitrate_estimate_var: 50.0,
        }
    }

    // Returns the rate of a completed window in kbps, if any.
    fn update_window(
        &mut self,
        now_ms: i64,
        bytes: i64,
        rate_window_ms: i64,
    ) -> Option<(f64, bool)> {
        if let Some(prev_time_ms) = self.prev_time_ms {
            if now_ms < prev_time_ms {
                tracing::warn!("Time moved backwards, resetting the throughput window.");
                self.accumulated_bytes = 0;
                self.current_window_ms = 0;
            } else {
                let elapsed_ms = now_ms - prev_time_ms;
                self.current_window_ms += elapsed_ms;
                // Reset if nothing has been received for more than a full window.
                if elapsed_ms > rate_window_ms {
                    self.accumulated_bytes = 0;
                    self.current_window_ms %= rate_window_ms;
                }
            }
        }
        self.prev_time_ms = Some(now_ms);

        let mut sample = None;
        if self.current_window_ms >= rate_window_ms {
            let is_small_sample =
                self.accumulated_bytes < self.config.small_sample_threshold.bytes();
            let bitrate_sample_kbps = 8.0 * self.accumulated_bytes as f64 / rate_window_ms as f64;
            tracing::trace!(
                bitrate_sample_kbps,
                accumulated_bytes = self.accumulated_bytes,
                rate_window_ms,
                "throughput sample"
            );
            self.current_window_ms -= rate_window_ms;
            self.accumulated_bytes = 0;
            sample = Some((bitrate_sample_kbps, is_small_sample));
        }
        self.accumulated_bytes += bytes;
        sample
    }
}

impl Default for ThroughputEstimator {
    fn default() -> Self {
        Self::new(ThroughputEstimatorConfig::default())
    }
}

impl ThroughputEstimatorInterface for ThroughputEstimator {
    fn update(&mut self, at_time: Timestamp, amount: DataSize, in_alr: bool) {
        // We use a larger window at the beginning to get a more stable sample that
        // we can use to initialize the estimate.
        let rate_window = match self.bitrate_estimate_kbps {
            Some(_) => self.config.noninitial_window,
            None => self.config.initial_window,
        };
        let Some((bitrate_sample_kbps, is_small_sample)) =
            self.update_window(at_time.ms(), amount.bytes(), rate_window.ms())
        else {
            return;
        };
        let Some(bitrate_estimate_kbps) = self.bitrate_estimate_kbps else {
            // This is the very first sample we get. Use it to initialize the estimate.
            self.bitrate_estimate_kbps = Some(bitrate_sample_kbps);
            return;
        };

        // Optionally use higher uncertainty for very small samples to avoid dropping
        // estimate and for samples obtained in ALR.
        let mut scale = self.config.uncertainty_scale;
        if bitrate_sample_kbps < bitrate_estimate_kbps {
            if is_small_sample {
                scale = self.config.small_sample_uncertainty_scale;
            } else if in_alr {
                scale = self.config.uncertainty_scale_in_alr;
            }
        }
        // Define the sample uncertainty as a function of how far away it is from the
        // current estimate. With low values of uncertainty_symmetry_cap we add more
        // uncertainty to increases than to decreases. For higher values we approach
        // symmetry.
        let sample_uncertainty = scale * (bitrate_estimate_kbps - bitrate_sample_kbps).abs()
            / (bitrate_estimate_kbps
                + bitrate_sample_kbps.max(self.config.uncertainty_symmetry_cap.kbps_float()));

        let sample_var = sample_uncertainty * sample_uncertainty;
        // Update a bayesian estimate of the rate, weighting it lower if the sample
        // uncertainty is large.
        // The bitrate estimate uncertainty is increased with each update to model
        // that the bitrate changes over time.
        let pred_bitrate_estimate_var = self.bitrate_estimate_var + 5.0;
        let new_estimate_kbps = (sample_var * bitrate_estimate_kbps
            + pred_bitrate_estimate_var * bitrate_sample_kbps)
            / (sample_var + pred_bitrate_estimate_var);
        self.bitrate_estimate_kbps =
            Some(new_estimate_kbps.max(self.config.estimate_floor.kbps_float()));
        self.bitrate_estimate_var =
            sample_var * pred_bitrate_estimate_var / (sample_var + pred_bitrate_estimate_var);
    }

    fn estimate(&self) -> Option<DataRate> {
        self.bitrate_estimate_kbps
            .map(DataRate::from_kilobits_per_sec_float)
    }

    fn peek_rate(&self) -> Option<DataRate> {
        if self.current_window_ms > 0 {
            return Some(
                DataSize::from_bytes(self.accumulated_bytes)
                    / TimeDelta::from_millis(self.current_window_ms),
            );
        }
        None
    }

    fn expect_fast_rate_change(&mut self) {
        // By setting the bitrate-estimate variance to a higher value we allow the
        // bitrate to change fast for the next few samples.
        self.bitrate_estimate_var += 200.0;
    }
}

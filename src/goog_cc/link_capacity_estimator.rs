/*
 *  Copyright 2018 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::api::units::DataRate;

/// Moving average of the link capacity observed at overuse and probe
/// events, with a normalized variance to bound it.
#[derive(Debug, Clone)]
pub struct LinkCapacityEstimator {
    estimate_kbps: Option<f64>,
    // Normalized with the estimate.
    variance_kbps: f64,
}

impl Default for LinkCapacityEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkCapacityEstimator {
    pub fn new() -> Self {
        Self {
            estimate_kbps: None,
            variance_kbps: 0.4,
        }
    }

    /// Three standard deviations above the average.
    pub fn upper_bound(&self) -> Option<DataRate> {
        self.estimate_kbps.map(|estimate_kbps| {
            DataRate::from_kilobits_per_sec_float(
                estimate_kbps + 3.0 * self.std_dev_kbps(estimate_kbps),
            )
        })
    }

    /// Three standard deviations below the average, never negative.
    pub fn lower_bound(&self) -> Option<DataRate> {
        self.estimate_kbps.map(|estimate_kbps| {
            DataRate::from_kilobits_per_sec_float(
                (estimate_kbps - 3.0 * self.std_dev_kbps(estimate_kbps)).max(0.0),
            )
        })
    }

    pub fn estimate(&self) -> Option<DataRate> {
        self.estimate_kbps.map(DataRate::from_kilobits_per_sec_float)
    }

    pub fn has_estimate(&self) -> bool {
        self.estimate_kbps.is_some()
    }

    pub fn reset(&mut self) {
        self.estimate_kbps = None;
    }

    pub fn on_overuse_detected(&mut self, acknowledged_rate: DataRate) {
        // The average is expected to cover several decrease events.
        self.update(acknowledged_rate, 0.95);
    }

    pub fn on_probe_rate(&mut self, probe_rate: DataRate) {
        self.update(probe_rate, 0.5);
    }

    fn update(&mut self, capacity_sample: DataRate, smoothing_coeff: f64) {
        let sample_kbps = capacity_sample.kbps_float();
        let estimate_kbps = match self.estimate_kbps {
            Some(estimate_kbps) => {
                smoothing_coeff * estimate_kbps + (1.0 - smoothing_coeff) * sample_kbps
            }
            None => sample_kbps,
        };

        // Estimate the variance of the link capacity estimate and normalize the
        // variance with the link capacity estimate.
        let norm = estimate_kbps.max(1.0);
        let error_kbps = estimate_kbps - sample_kbps;
        self.variance_kbps = smoothing_coeff * self.variance_kbps
            + (1.0 - smoothing_coeff) * error_kbps * error_kbps / norm;
        // 0.4 ~= 14 kbit/s at 500 kbit/s
        // 2.5 ~= 35 kbit/s at 500 kbit/s
        self.variance_kbps = self.variance_kbps.clamp(0.4, 2.5);
        self.estimate_kbps = Some(estimate_kbps);
    }

    fn std_dev_kbps(&self, estimate_kbps: f64) -> f64 {
        (self.variance_kbps * estimate_kbps).sqrt()
    }
}

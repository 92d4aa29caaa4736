/*
 *  Copyright (c) 2019 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::{
    api::units::Timestamp,
    components::{AlrDetector, AlrDetectorConfig, CongestionControlHandler},
    goog_cc::{
        AcknowledgedBitrateEstimator, LossFeedbackBasedBwe, LossFeedbackBasedBweConfig,
        LossReportBasedBwe, LossReportBasedBweConfig, ProbeBitrateEstimator, ProbeController,
        ProbeControllerConfig, ThroughputEstimator, ThroughputEstimatorConfig,
    },
    pacing::{BitrateProberConfig, PacingController, PacingSettings, PacketSender},
    remote_bitrate_estimator::{AimdRateControl, AimdRateControlConfig},
};

/// Every tunable of the engine in one place.
#[derive(Clone, Debug, Default)]
pub struct FieldTrials {
    // WebRTC-BweBackOffFactor, WebRTC-DontIncreaseDelayBasedBweInAlr,
    // WebRTC-BweInitialBackOffInterval, WebRTC-Bwe-LinkCapacityFix
    pub aimd_rate_control: AimdRateControlConfig,

    // WebRTC-Bwe-RobustThroughputEstimatorSettings
    pub throughput_estimator: ThroughputEstimatorConfig,

    // WebRTC-BweLossExperiment
    pub loss_report_based_bwe: LossReportBasedBweConfig,

    // WebRTC-Bwe-LossBasedControl
    pub loss_feedback_based_bwe: LossFeedbackBasedBweConfig,

    // WebRTC-Bwe-ProbingConfiguration
    pub probe_controller: ProbeControllerConfig,

    // WebRTC-AlrDetectorParameters
    pub alr_detector: AlrDetectorConfig,

    // WebRTC-Bwe-ProbingBehavior
    pub bitrate_prober: BitrateProberConfig,

    // WebRTC-Pacer-*
    pub pacing: PacingSettings,

    // WebRTC-PacerEmergencyStop
    pub pacer_emergency_stop: bool,
}

impl FieldTrials {
    pub fn aimd_rate_control(&self, send_side: bool) -> AimdRateControl {
        AimdRateControl::new(self.aimd_rate_control.clone(), send_side)
    }

    pub fn acknowledged_bitrate_estimator(&self) -> AcknowledgedBitrateEstimator {
        AcknowledgedBitrateEstimator::new(ThroughputEstimator::new(
            self.throughput_estimator.clone(),
        ))
    }

    pub fn loss_report_based_bwe(&self) -> LossReportBasedBwe {
        LossReportBasedBwe::new(self.loss_report_based_bwe.clone())
    }

    pub fn loss_feedback_based_bwe(&self) -> LossFeedbackBasedBwe {
        LossFeedbackBasedBwe::new(self.loss_feedback_based_bwe.clone())
    }

    pub fn probe_controller(&self) -> ProbeController {
        ProbeController::new(self.probe_controller.clone())
    }

    pub fn probe_bitrate_estimator(&self) -> ProbeBitrateEstimator {
        ProbeBitrateEstimator::default()
    }

    pub fn alr_detector(&self) -> AlrDetector {
        AlrDetector::new(self.alr_detector.clone())
    }

    pub fn pacing_controller<S: PacketSender>(
        &self,
        sender: S,
        now: Timestamp,
    ) -> PacingController<S> {
        PacingController::new(self.pacing.clone(), self.bitrate_prober.clone(), sender, now)
    }

    pub fn congestion_control_handler(&self) -> CongestionControlHandler {
        CongestionControlHandler::new(self.pacer_emergency_stop)
    }
}

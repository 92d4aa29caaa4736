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
        transport::TargetTransferBitrate,
        units::{DataRate, TimeDelta},
    },
    pacing::MAX_EXPECTED_QUEUE_TIME,
    rtc::SequenceChecker,
};

/// Decides which target bitrate updates reach the encoder. Pauses encoding
/// by reporting a zero target while the network is down or, optionally, while
/// the pacer queue is too long.
#[derive(Debug)]
pub struct CongestionControlHandler {
    sequence_checker: SequenceChecker,
    enable_pacer_emergency_stop: bool,
    network_available: bool,
    pacer_expected_queue_time: TimeDelta,
    last_incoming: Option<TargetTransferBitrate>,
    last_reported: Option<TargetTransferBitrate>,
}

impl CongestionControlHandler {
    pub fn new(enable_pacer_emergency_stop: bool) -> Self {
        Self {
            sequence_checker: SequenceChecker::detached(),
            enable_pacer_emergency_stop,
            network_available: true,
            pacer_expected_queue_time: TimeDelta::zero(),
            last_incoming: None,
            last_reported: None,
        }
    }

    pub fn on_pacer_expected_queue_time(&mut self, expected_queue_time: TimeDelta) {
        self.sequence_checker.check();
        self.pacer_expected_queue_time = expected_queue_time;
    }

    pub fn on_target_transfer_bitrate(&mut self, target_bitrate: TargetTransferBitrate) {
        self.sequence_checker.check();
        assert!(target_bitrate.at_time.is_finite());
        self.last_incoming = Some(target_bitrate);
    }

    pub fn on_network_availability(&mut self, network_available: bool) {
        self.sequence_checker.check();
        self.network_available = network_available;
    }

    /// The update to hand to the encoder, if anything changed since the last
    /// one.
    pub fn get_update(&mut self) -> Option<TargetTransferBitrate> {
        self.sequence_checker.check();
        let mut new_outgoing = self.last_incoming?;

        let pause_encoding = !self.network_available
            || (self.enable_pacer_emergency_stop
                && self.pacer_expected_queue_time > MAX_EXPECTED_QUEUE_TIME);
        if pause_encoding {
            new_outgoing.target_bitrate = DataRate::zero();
        }

        if !self.is_new_report(&new_outgoing) {
            return None;
        }
        self.last_reported = Some(new_outgoing);
        Some(new_outgoing)
    }

    fn is_new_report(&self, new_outgoing: &TargetTransferBitrate) -> bool {
        let Some(last_reported) = &self.last_reported else {
            return true;
        };
        if last_reported.target_bitrate != new_outgoing.target_bitrate {
            if new_outgoing.target_bitrate.is_zero() {
                tracing::info!("pausing encoding");
            } else if last_reported.target_bitrate.is_zero() {
                tracing::info!("resuming encoding");
            }
            tracing::debug!(
                from = ?last_reported.target_bitrate,
                to = ?new_outgoing.target_bitrate,
                "bitrate estimate changed"
            );
            return true;
        }
        if !new_outgoing.target_bitrate.is_zero() {
            let last = &last_reported.network_estimate;
            let new = &new_outgoing.network_estimate;
            if last.loss_rate_ratio != new.loss_rate_ratio || last.rtt != new.rtt {
                tracing::debug!(
                    loss_rate_ratio = new.loss_rate_ratio,
                    rtt = ?new.rtt,
                    "network estimate changed"
                );
                return true;
            }
        }
        false
    }
}

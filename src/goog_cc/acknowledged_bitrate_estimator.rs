/*
 *  Copyright (c) 2017 The WebRTC project authors. All Rights Reserved.
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
        units::{DataRate, Timestamp},
    },
    goog_cc::{ThroughputEstimator, ThroughputEstimatorInterface},
};

/// Feeds acknowledged packets into a throughput estimator, widening its
/// uncertainty once the application leaves a limited region.
#[derive(Debug, Clone)]
pub struct AcknowledgedBitrateEstimator<E = ThroughputEstimator> {
    alr_ended_time: Option<Timestamp>,
    in_alr: bool,
    throughput_estimator: E,
}

impl Default for AcknowledgedBitrateEstimator {
    fn default() -> Self {
        Self::new(ThroughputEstimator::default())
    }
}

impl<E: ThroughputEstimatorInterface> AcknowledgedBitrateEstimator<E> {
    pub fn new(throughput_estimator: E) -> Self {
        Self {
            alr_ended_time: None,
            in_alr: false,
            throughput_estimator,
        }
    }

    /// Packets are expected in receive time order.
    pub fn incoming_packet_feedbacks(&mut self, packet_feedbacks: &[PacketResult]) {
        debug_assert!(packet_feedbacks
            .windows(2)
            .all(|w| w[0].recv_time <= w[1].recv_time));

        for packet in packet_feedbacks {
            if let Some(alr_ended_time) = self.alr_ended_time {
                if packet.sent_packet.send_time > alr_ended_time {
                    self.throughput_estimator.expect_fast_rate_change();
                    self.alr_ended_time = None;
                }
            }
            let acknowledged_size =
                packet.sent_packet.size + packet.sent_packet.prior_unacked_bytes;
            self.throughput_estimator
                .update(packet.recv_time, acknowledged_size, self.in_alr);
        }
    }

    pub fn estimate(&self) -> Option<DataRate> {
        self.throughput_estimator.estimate()
    }

    pub fn peek_rate(&self) -> Option<DataRate> {
        self.throughput_estimator.peek_rate()
    }

    pub fn set_alr_ended_time(&mut self, alr_ended_time: Timestamp) {
        self.alr_ended_time = Some(alr_ended_time);
    }

    pub fn set_alr(&mut self, in_alr: bool) {
        self.in_alr = in_alr;
    }
}

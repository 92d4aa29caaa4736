/*
 *  Copyright (c) 2016 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::collections::HashMap;

use crate::api::{
    transport::PacketResult,
    units::{DataRate, DataSize, TimeDelta, Timestamp},
};

#[derive(Debug)]
struct AggregatedCluster {
    num_probes: usize,
    first_send: Timestamp,
    last_send: Timestamp,
    first_receive: Timestamp,
    last_receive: Timestamp,
    size_last_send: DataSize,
    size_first_receive: DataSize,
    size_total: DataSize,
}

impl Default for AggregatedCluster {
    fn default() -> Self {
        Self {
            num_probes: 0,
            first_send: Timestamp::plus_infinity(),
            last_send: Timestamp::minus_infinity(),
            first_receive: Timestamp::plus_infinity(),
            last_receive: Timestamp::minus_infinity(),
            size_last_send: DataSize::zero(),
            size_first_receive: DataSize::zero(),
            size_total: DataSize::zero(),
        }
    }
}

/// Turns the feedback of a probe cluster into a measured link bitrate.
#[derive(Debug, Default)]
pub struct ProbeBitrateEstimator {
    clusters: HashMap<i32, AggregatedCluster>,
    estimated_data_rate: Option<DataRate>,
}

impl ProbeBitrateEstimator {
    // The minimum share of a cluster's probes and bytes that must be reported
    // before the cluster gives a valid estimate.
    const MIN_RECEIVED_PROBES_RATIO: f64 = 0.80;
    const MIN_RECEIVED_BYTES_RATIO: f64 = 0.80;

    // The maximum |receive rate| / |send rate| ratio for a valid estimate.
    const MAX_VALID_RATIO: f64 = 2.0;

    // We assume the link isn't saturated as long as we receive at least this
    // share of the send rate.
    const MIN_RATIO_FOR_UNSATURATED_LINK: f64 = 0.9;

    // If we know true link capacity we'd like to send at 95% of that rate.
    const TARGET_UTILIZATION_FRACTION: f64 = 0.95;

    // Also the longest a probing burst is expected to last.
    const MAX_CLUSTER_HISTORY: TimeDelta = TimeDelta::from_seconds(1);

    // The maximum time between the first and the last probe of a cluster, on
    // the send side as well as the receive side.
    const MAX_PROBE_INTERVAL: TimeDelta = TimeDelta::from_seconds(1);

    /// Should be called for every probe packet we receive feedback about.
    /// Returns the estimated bitrate if the probe completes a valid cluster.
    pub fn handle_probe_and_estimate_bitrate(
        &mut self,
        packet_feedback: &PacketResult,
    ) -> Option<DataRate> {
        let probe_cluster = packet_feedback.sent_packet.pacing_info.probe_cluster?;
        let cluster_id = probe_cluster.id;
        let send_time = packet_feedback.sent_packet.send_time;
        let receive_time = packet_feedback.recv_time;
        let size = packet_feedback.sent_packet.size;

        self.erase_old_clusters(receive_time);

        let cluster = self.clusters.entry(cluster_id).or_default();
        if send_time < cluster.first_send {
            cluster.first_send = send_time;
        }
        if send_time > cluster.last_send {
            cluster.last_send = send_time;
            cluster.size_last_send = size;
        }
        if receive_time < cluster.first_receive {
            cluster.first_receive = receive_time;
            cluster.size_first_receive = size;
        }
        if receive_time > cluster.last_receive {
            cluster.last_receive = receive_time;
        }
        cluster.size_total += size;
        cluster.num_probes += 1;

        debug_assert!(probe_cluster.min_probes > 0);
        debug_assert!(probe_cluster.min_bytes > DataSize::zero());

        let min_probes =
            (probe_cluster.min_probes as f64 * Self::MIN_RECEIVED_PROBES_RATIO) as usize;
        let min_size = probe_cluster.min_bytes * Self::MIN_RECEIVED_BYTES_RATIO;
        if cluster.num_probes < min_probes || cluster.size_total < min_size {
            return None;
        }

        let send_interval = cluster.last_send - cluster.first_send;
        let receive_interval = cluster.last_receive - cluster.first_receive;
        if send_interval <= TimeDelta::zero()
            || send_interval > Self::MAX_PROBE_INTERVAL
            || receive_interval <= TimeDelta::zero()
            || receive_interval > Self::MAX_PROBE_INTERVAL
        {
            tracing::info!(
                cluster_id,
                ?send_interval,
                ?receive_interval,
                "Probing unsuccessful, invalid send/receive interval"
            );
            return None;
        }

        // The send interval doesn't cover sending the last packet, so its size
        // is left out of the send rate.
        let send_size = cluster.size_total.saturating_sub(cluster.size_last_send);
        let send_rate = send_size / send_interval;

        // Likewise the receive interval doesn't cover receiving the first packet.
        let receive_size = cluster.size_total.saturating_sub(cluster.size_first_receive);
        let receive_rate = receive_size / receive_interval;

        let ratio = receive_rate / send_rate;
        if ratio > Self::MAX_VALID_RATIO {
            tracing::info!(
                cluster_id,
                ?send_rate,
                ?receive_rate,
                ratio,
                "Probing unsuccessful, receive/send ratio too high"
            );
            return None;
        }
        tracing::info!(cluster_id, ?send_rate, ?receive_rate, "Probing successful");

        let mut estimate = std::cmp::min(send_rate, receive_rate);
        // Receiving at a clearly lower rate than we sent at means we found the
        // link capacity. Aim slightly below it so we don't overuse right away.
        if receive_rate < send_rate * Self::MIN_RATIO_FOR_UNSATURATED_LINK {
            estimate = receive_rate * Self::TARGET_UTILIZATION_FRACTION;
        }
        self.estimated_data_rate = Some(estimate);
        self.estimated_data_rate
    }

    pub fn fetch_and_reset_last_estimated_bitrate(&mut self) -> Option<DataRate> {
        self.estimated_data_rate.take()
    }

    fn erase_old_clusters(&mut self, timestamp: Timestamp) {
        self.clusters
            .retain(|_, cluster| cluster.last_receive + Self::MAX_CLUSTER_HISTORY >= timestamp);
    }
}

/*
 *  Copyright (c) 2018 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::cmp::Ordering;

use crate::api::units::{DataRate, DataSize, TimeDelta, Timestamp};

/// Parameters of a probe cluster as seen by packets sent inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeCluster {
    pub id: i32,
    /// The minimum number of packets needed to estimate the probe bitrate.
    pub min_probes: usize,
    /// The minimum number of bytes needed to estimate the probe bitrate.
    pub min_bytes: DataSize,
    pub bytes_sent: DataSize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacedPacketInfo {
    pub send_bitrate: DataRate,
    /// Set when the packet was sent as part of a probe cluster.
    pub probe_cluster: Option<ProbeCluster>,
}

impl PacedPacketInfo {
    pub fn is_probe(&self) -> bool {
        self.probe_cluster.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SentPacket {
    pub send_time: Timestamp,
    /// Size of packet with overhead up to IP layer.
    pub size: DataSize,
    /// Size of preceeding packets that are not part of feedback.
    pub prior_unacked_bytes: DataSize,
    pub pacing_info: PacedPacketInfo,
    /// True if the packet is an audio packet, false for video, padding, RTX etc.
    pub is_audio: bool,
    /// The unwrapped transport sequence number, unique for any tracked packet.
    pub packet_id: i64,
    /// Tracked data in flight when the packet was sent, excluding unacked data.
    pub bytes_in_flight: DataSize,
}

impl Default for SentPacket {
    fn default() -> Self {
        Self {
            send_time: Timestamp::plus_infinity(),
            size: DataSize::zero(),
            prior_unacked_bytes: DataSize::zero(),
            pacing_info: PacedPacketInfo::default(),
            is_audio: false,
            packet_id: -1,
            bytes_in_flight: DataSize::zero(),
        }
    }
}

// Transport level feedback

/// Loss counters taken from an RTCP receiver report.
#[derive(Debug, Clone, Copy)]
pub struct TransportLossReport {
    pub receive_time: Timestamp,
    pub num_packets_lost: u64,
    pub num_packets: u64,
}

impl Default for TransportLossReport {
    fn default() -> Self {
        Self {
            receive_time: Timestamp::plus_infinity(),
            num_packets_lost: 0,
            num_packets: 0,
        }
    }
}

// Packet level feedback

#[derive(Debug, Clone, Copy)]
pub struct PacketResult {
    pub sent_packet: SentPacket,
    /// Plus infinity when the packet was reported lost.
    pub recv_time: Timestamp,
}

impl PacketResult {
    pub const fn is_received(&self) -> bool {
        !self.recv_time.is_infinite()
    }

    pub const fn is_lost(&self) -> bool {
        !self.is_received()
    }

    /// Orders by receive time, then send time, then packet id.
    pub fn receive_time_order(&self, other: &Self) -> Ordering {
        self.recv_time
            .cmp(&other.recv_time)
            .then(self.sent_packet.send_time.cmp(&other.sent_packet.send_time))
            .then(self.sent_packet.packet_id.cmp(&other.sent_packet.packet_id))
    }
}

impl Default for PacketResult {
    fn default() -> Self {
        Self {
            sent_packet: SentPacket::default(),
            recv_time: Timestamp::plus_infinity(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportPacketsFeedback {
    pub receive_time: Timestamp,
    pub first_unacked_send_time: Timestamp,
    /// The receive time of the last acknowledged packet.
    pub last_acked_recv_time: Timestamp,
    pub bytes_in_flight: DataSize,
    pub prior_in_flight: DataSize,
    pub packet_feedbacks: Vec<PacketResult>,
    /// Arrival times for messages without send time information.
    pub sendless_arrival_times: Vec<Timestamp>,
}

impl Default for TransportPacketsFeedback {
    fn default() -> Self {
        Self {
            receive_time: Timestamp::plus_infinity(),
            first_unacked_send_time: Timestamp::plus_infinity(),
            last_acked_recv_time: Timestamp::minus_infinity(),
            bytes_in_flight: DataSize::zero(),
            prior_in_flight: DataSize::zero(),
            packet_feedbacks: Vec::new(),
            sendless_arrival_times: Vec::new(),
        }
    }
}

impl TransportPacketsFeedback {
    pub fn received_packets(&self) -> impl Iterator<Item = &PacketResult> {
        self.packet_feedbacks.iter().filter(|fb| fb.is_received())
    }

    pub fn lost_packets(&self) -> impl Iterator<Item = &PacketResult> {
        self.packet_feedbacks.iter().filter(|fb| fb.is_lost())
    }

    pub fn sorted_by_receive_time(&self) -> Vec<PacketResult> {
        let mut res: Vec<PacketResult> = self.received_packets().cloned().collect();
        res.sort_by(|a, b| a.receive_time_order(b));
        res
    }
}

// Network control

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkEstimate {
    pub loss_rate_ratio: f32,
    pub rtt: TimeDelta,
    pub bwe_period: TimeDelta,
    pub at_time: Timestamp,
}

impl Default for NetworkEstimate {
    fn default() -> Self {
        Self {
            loss_rate_ratio: 0.0,
            rtt: TimeDelta::plus_infinity(),
            bwe_period: TimeDelta::plus_infinity(),
            at_time: Timestamp::plus_infinity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacerConfig {
    pub pacing_bitrate: DataRate,
    pub padding_bitrate: DataRate,
    pub time_window: TimeDelta,
    pub at_time: Timestamp,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            pacing_bitrate: DataRate::zero(),
            padding_bitrate: DataRate::zero(),
            time_window: TimeDelta::plus_infinity(),
            at_time: Timestamp::plus_infinity(),
        }
    }
}

impl PacerConfig {
    /// Pacer should send at most this many bytes over `time_window`.
    pub fn pacing_window(&self) -> DataSize {
        self.pacing_bitrate * self.time_window
    }

    /// Pacer should send at least this many bytes over `time_window`.
    pub fn padding_window(&self) -> DataSize {
        self.padding_bitrate * self.time_window
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeClusterConfig {
    pub id: i32,
    pub target_bitrate: DataRate,
    pub target_probe_count: usize,
    /// Delta time between sent bursts of packets during probe.
    pub target_interval: TimeDelta,
    pub at_time: Timestamp,
}

impl Default for ProbeClusterConfig {
    fn default() -> Self {
        Self {
            id: 0,
            target_bitrate: DataRate::zero(),
            target_probe_count: 0,
            target_interval: TimeDelta::zero(),
            at_time: Timestamp::plus_infinity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetTransferBitrate {
    pub at_time: Timestamp,
    /// The estimate on which the target bitrate is based on.
    pub network_estimate: NetworkEstimate,
    pub target_bitrate: DataRate,
    pub stable_target_bitrate: DataRate,
    pub cwnd_reduce_ratio: f64,
}

impl Default for TargetTransferBitrate {
    fn default() -> Self {
        Self {
            at_time: Timestamp::plus_infinity(),
            network_estimate: NetworkEstimate::default(),
            target_bitrate: DataRate::zero(),
            stable_target_bitrate: DataRate::zero(),
            cwnd_reduce_ratio: 0.0,
        }
    }
}

/// Contains updates of network controller command state. Using optionals to
/// indicate whether a member has been updated. The array of probe clusters
/// should be used to send out probes if not empty.
#[derive(Default, Debug, Clone)]
pub struct NetworkControlUpdate {
    pub congestion_window: Option<DataSize>,
    pub pacer_config: Option<PacerConfig>,
    pub probe_cluster_configs: Vec<ProbeClusterConfig>,
    pub target_bitrate: Option<TargetTransferBitrate>,
}

impl NetworkControlUpdate {
    pub fn has_updates(&self) -> bool {
        self.congestion_window.is_some()
            || self.pacer_config.is_some()
            || !self.probe_cluster_configs.is_empty()
            || self.target_bitrate.is_some()
    }

    pub fn append_probes(&mut self, probes: Vec<ProbeClusterConfig>) {
        self.probe_cluster_configs.extend(probes);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkAvailability {
    pub network_available: bool,
    pub at_time: Timestamp,
}

impl Default for NetworkAvailability {
    fn default() -> Self {
        Self {
            network_available: false,
            at_time: Timestamp::plus_infinity(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TargetBitrateConstraints {
    pub min_bitrate: Option<DataRate>,
    pub max_bitrate: Option<DataRate>,
    /// The initial bandwidth estimate to base target bitrate on.
    pub starting_bitrate: Option<DataRate>,
    pub at_time: Timestamp,
}

impl Default for TargetBitrateConstraints {
    fn default() -> Self {
        Self {
            min_bitrate: None,
            max_bitrate: None,
            starting_bitrate: None,
            at_time: Timestamp::plus_infinity(),
        }
    }
}

/// Represents constraints and rates related to the currently enabled streams.
#[derive(Default, Clone, Copy, Debug)]
pub struct BitrateAllocationLimits {
    /// The total minimum send bitrate required by all send streams.
    pub min_total_allocated_bitrate: DataRate,
    /// The total maximum allocatable bitrate for all currently available streams.
    pub max_total_allocated_bitrate: DataRate,
    /// The max bitrate to use for padding. The sum of the per-stream max padding
    /// rate.
    pub max_padding_bitrate: DataRate,
}

#[derive(Debug, Clone, Copy)]
pub struct StreamsConfig {
    pub request_alr_probing: Option<bool>,
    pub pacing_factor: Option<f64>,
    pub allocated_bitrate_limits: BitrateAllocationLimits,
    pub at_time: Timestamp,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            request_alr_probing: None,
            pacing_factor: None,
            allocated_bitrate_limits: BitrateAllocationLimits::default(),
            at_time: Timestamp::plus_infinity(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PeriodicUpdate {
    /// The number of bytes queued in the pacer.
    pub pacer_queue_size: Option<DataSize>,
    pub at_time: Timestamp,
}

impl Default for PeriodicUpdate {
    fn default() -> Self {
        Self {
            pacer_queue_size: None,
            at_time: Timestamp::plus_infinity(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn result(id: i64, send_ms: i64, recv: Timestamp) -> PacketResult {
        PacketResult {
            sent_packet: SentPacket {
                send_time: Timestamp::from_millis(send_ms),
                size: DataSize::from_bytes(1200),
                packet_id: id,
                ..Default::default()
            },
            recv_time: recv,
        }
    }

    #[test]
    fn lost_and_received_are_exclusive() {
        let received = result(1, 10, Timestamp::from_millis(40));
        let lost = result(2, 20, Timestamp::plus_infinity());
        assert!(received.is_received() && !received.is_lost());
        assert!(lost.is_lost() && !lost.is_received());
        assert!(PacketResult::default().is_lost());
    }

    #[test]
    fn feedback_sorts_received_packets_by_arrival() {
        let feedback = TransportPacketsFeedback {
            packet_feedbacks: vec![
                result(1, 10, Timestamp::from_millis(50)),
                result(2, 20, Timestamp::plus_infinity()),
                result(3, 30, Timestamp::from_millis(45)),
                result(4, 25, Timestamp::from_millis(45)),
            ],
            ..Default::default()
        };
        let sorted: Vec<i64> = feedback
            .sorted_by_receive_time()
            .iter()
            .map(|p| p.sent_packet.packet_id)
            .collect();
        assert_eq!(sorted, vec![4, 3, 1]);
        assert_eq!(feedback.lost_packets().count(), 1);
        assert_eq!(feedback.received_packets().count(), 3);
    }

    #[test]
    fn pacer_config_windows() {
        let config = PacerConfig {
            pacing_bitrate: DataRate::from_kilobits_per_sec(800),
            padding_bitrate: DataRate::from_kilobits_per_sec(80),
            time_window: TimeDelta::from_seconds(1),
            at_time: Timestamp::from_millis(0),
        };
        assert_eq!(config.pacing_window(), DataSize::from_bytes(100_000));
        assert_eq!(config.padding_window(), DataSize::from_bytes(10_000));
    }

    #[test]
    fn control_update_reports_updates() {
        let mut update = NetworkControlUpdate::default();
        assert!(!update.has_updates());
        update.append_probes(vec![]);
        assert!(!update.has_updates());
        update.append_probes(vec![ProbeClusterConfig::default()]);
        assert!(update.has_updates());
    }
}

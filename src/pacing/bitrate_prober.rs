/*
 *  Copyright (c) 2014 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::collections::VecDeque;

use crate::{
    api::{
        transport::{PacedPacketInfo, ProbeCluster},
        units::{DataRate, DataSize, TimeDelta, Timestamp},
    },
    pacing::PacingError,
};

// WebRTC-Bwe-ProbingBehavior
#[derive(Clone, Debug)]
pub struct BitrateProberConfig {
    // The minimum number probing packets used.
    pub min_probe_packets_sent: usize, // min_packets
    // A minimum interval between probes to allow scheduling to be feasible.
    pub min_probe_delta: TimeDelta, // min_probe_delta
    // The minimum probing duration.
    pub min_probe_duration: TimeDelta, // min_duration
    // Maximum amount of time each probe can be delayed.
    pub max_probe_delay: TimeDelta, // max_probe_delay
    // Drop a late probe cluster instead of refusing to send anything further.
    pub abort_delayed_probes: bool, // abort_delayed_probes
}

impl Default for BitrateProberConfig {
    fn default() -> Self {
        Self {
            min_probe_packets_sent: 5,
            min_probe_delta: TimeDelta::from_millis(2),
            min_probe_duration: TimeDelta::from_millis(15),
            max_probe_delay: TimeDelta::from_millis(3),
            abort_delayed_probes: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProberState {
    // Probing will not be triggered in this state at all times.
    Disabled,
    // Probing is enabled and ready to trigger on the first packet arrival.
    Inactive,
    // Probe cluster is filled with the set of data rates to be probed and
    // probes are being sent.
    Active,
    // Probing is enabled, but currently suspended until an explicit trigger
    // to start probing again.
    Suspended,
}

#[derive(Clone, Debug)]
struct Cluster {
    pace_info: PacedPacketInfo,
    sent_probes: usize,
    sent_bytes: DataSize,
    created_at: Timestamp,
    started_at: Timestamp,
}

impl Cluster {
    fn is_done(&self) -> bool {
        self.pace_info.probe_cluster.as_ref().is_some_and(|probe| {
            self.sent_bytes >= probe.min_bytes && self.sent_probes >= probe.min_probes
        })
    }
}

/// Schedules the packets of the probe clusters so that they go out at the
/// probed bitrate.
#[derive(Debug)]
pub struct BitrateProber {
    config: BitrateProberConfig,
    probing_state: ProberState,
    // Probe bitrate per packet. These are used to compute the delta relative to
    // the previous probe packet based on the size and time when that packet was
    // sent.
    clusters: VecDeque<Cluster>,
    // Time the next probe should be sent when in the active state.
    next_probe_time: Timestamp,
    total_probe_count: usize,
    total_failed_probe_count: usize,
}

impl Default for BitrateProber {
    fn default() -> Self {
        Self::new(BitrateProberConfig::default())
    }
}

impl BitrateProber {
    // The min probe packet size is scaled with the bitrate we're probing at.
    // This defines the max min probe packet size, meaning that on high bitrates
    // we have a min probe packet size of 200 bytes.
    const MIN_PROBE_PACKET_SIZE: DataSize = DataSize::from_bytes(200);

    const PROBE_CLUSTER_TIMEOUT: TimeDelta = TimeDelta::from_seconds(5);

    pub fn new(config: BitrateProberConfig) -> Self {
        Self {
            config,
            probing_state: ProberState::Inactive,
            clusters: VecDeque::new(),
            next_probe_time: Timestamp::plus_infinity(),
            total_probe_count: 0,
            total_failed_probe_count: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            if self.probing_state == ProberState::Disabled {
                self.probing_state = ProberState::Inactive;
                tracing::info!("Bandwidth probing enabled, set to inactive");
            }
        } else {
            self.probing_state = ProberState::Disabled;
            tracing::info!("Bandwidth probing disabled");
        }
    }

    /// Returns true if the prober is in a probing session, i.e., it currently
    /// wants packets to be sent out according to the time returned by
    /// `next_time_to_probe`.
    pub fn is_probing(&self) -> bool {
        self.probing_state == ProberState::Active
    }

    pub fn state(&self) -> ProberState {
        self.probing_state
    }

    pub fn total_probe_count(&self) -> usize {
        self.total_probe_count
    }

    pub fn total_failed_probe_count(&self) -> usize {
        self.total_failed_probe_count
    }

    /// Initializes a new probing session if the prober is allowed to probe. Does
    /// not initialize the prober unless the packet size is large enough to probe
    /// with.
    pub fn on_incoming_packet(&mut self, packet_size: DataSize, at_time: Timestamp) {
        self.drop_timed_out_clusters(at_time);

        // Don't initialize probing unless we have something large enough to start
        // probing.
        let min_packet_size =
            std::cmp::min(self.recommended_min_probe_size(), Self::MIN_PROBE_PACKET_SIZE);
        if self.probing_state == ProberState::Inactive
            && !self.clusters.is_empty()
            && packet_size >= min_packet_size
        {
            // Send next probe right away.
            self.next_probe_time = Timestamp::minus_infinity();
            self.probing_state = ProberState::Active;
        }
    }

    pub fn add_probe_cluster(
        &mut self,
        cluster_id: i32,
        bitrate: DataRate,
        at_time: Timestamp,
    ) -> Result<(), PacingError> {
        if self.probing_state == ProberState::Disabled {
            return Err(PacingError::ProberDisabled);
        }
        if bitrate <= DataRate::zero() || bitrate.is_infinite() {
            return Err(PacingError::InvalidProbeBitrate(bitrate));
        }

        self.total_probe_count += 1;
        self.drop_timed_out_clusters(at_time);

        let probe_cluster = ProbeCluster {
            id: cluster_id,
            min_probes: self.config.min_probe_packets_sent,
            min_bytes: bitrate * self.config.min_probe_duration,
            bytes_sent: DataSize::zero(),
        };
        tracing::info!(
            "Probe cluster (bitrate:min bytes:min packets): ({:?}:{:?}:{})",
            bitrate,
            probe_cluster.min_bytes,
            probe_cluster.min_probes
        );
        self.clusters.push_back(Cluster {
            pace_info: PacedPacketInfo {
                send_bitrate: bitrate,
                probe_cluster: Some(probe_cluster),
            },
            sent_probes: 0,
            sent_bytes: DataSize::zero(),
            created_at: at_time,
            started_at: Timestamp::minus_infinity(),
        });

        // If we are already probing, continue to do so. Otherwise set it to
        // Inactive and wait for on_incoming_packet to start the probing.
        if self.probing_state != ProberState::Active {
            self.probing_state = ProberState::Inactive;
        }
        Ok(())
    }

    /// Returns the time at which the next probe should be sent to get accurate
    /// probing. If probing is not desired at this time, plus infinity is returned.
    pub fn next_time_to_probe(&self, at_time: Timestamp) -> Timestamp {
        // Probing is not active or probing is already complete.
        if self.probing_state != ProberState::Active || self.clusters.is_empty() {
            return Timestamp::plus_infinity();
        }

        if !self.config.abort_delayed_probes && self.is_probe_late(at_time) {
            tracing::warn!("Probe delay too high, not probing any further");
            return Timestamp::plus_infinity();
        }
        self.next_probe_time
    }

    /// Information about the current probing cluster, `None` when nothing is
    /// being probed.
    pub fn next_probe_cluster(&mut self, at_time: Timestamp) -> Option<PacedPacketInfo> {
        if self.probing_state != ProberState::Active {
            return None;
        }

        self.drop_timed_out_clusters(at_time);
        if self.config.abort_delayed_probes && self.is_probe_late(at_time) {
            tracing::warn!("Probe delay too high, discarding probe cluster");
            self.clusters.pop_front();
            self.total_failed_probe_count += 1;
            self.next_probe_time = Timestamp::minus_infinity();
            self.drop_timed_out_clusters(at_time);
        }

        let Some(cluster) = self.clusters.front() else {
            self.probing_state = ProberState::Suspended;
            return None;
        };
        let mut info = cluster.pace_info;
        if let Some(probe_cluster) = info.probe_cluster.as_mut() {
            probe_cluster.bytes_sent = cluster.sent_bytes;
        }
        Some(info)
    }

    /// Returns the minimum number of bytes that the prober recommends for
    /// the next probe, or zero if not probing. A probe can consist of multiple
    /// packets that are sent back to back.
    pub fn recommended_min_probe_size(&self) -> DataSize {
        // We choose a minimum of twice `min_probe_delta` interval to allow
        // scheduling to be feasible.
        match self.clusters.front() {
            Some(cluster) => cluster.pace_info.send_bitrate * (self.config.min_probe_delta * 2i64),
            None => DataSize::zero(),
        }
    }

    /// Called to report to the prober that a probe has been sent. In case of
    /// multiple packets per probe, this call would be made at the end of sending
    /// the last packet in probe.
    pub fn on_probe_sent(&mut self, size: DataSize, at_time: Timestamp) {
        if self.probing_state != ProberState::Active || size.is_zero() {
            return;
        }
        let Some(cluster) = self.clusters.front_mut() else {
            return;
        };
        if cluster.sent_probes == 0 {
            debug_assert!(cluster.started_at.is_infinite());
            cluster.started_at = at_time;
        }
        cluster.sent_bytes += size;
        cluster.sent_probes += 1;
        self.next_probe_time = Self::calculate_next_probe_time(cluster);
        if cluster.is_done() {
            tracing::debug!(
                sent_bytes = ?cluster.sent_bytes,
                sent_probes = cluster.sent_probes,
                "probe cluster done"
            );
            self.clusters.pop_front();
            self.drop_timed_out_clusters(at_time);
        }
        if self.clusters.is_empty() {
            self.probing_state = ProberState::Suspended;
        }
    }

    fn calculate_next_probe_time(cluster: &Cluster) -> Timestamp {
        debug_assert!(cluster.pace_info.send_bitrate > DataRate::zero());
        debug_assert!(cluster.started_at.is_finite());

        // Compute the time delta from the cluster start to ensure probe bitrate
        // stays close to the target bitrate.
        let delta = cluster.sent_bytes / cluster.pace_info.send_bitrate;
        cluster.started_at + delta
    }

    fn is_probe_late(&self, at_time: Timestamp) -> bool {
        self.next_probe_time.is_finite()
            && at_time - self.next_probe_time > self.config.max_probe_delay
    }

    // Clusters that never got a packet out within the timeout are of no use
    // any more.
    fn is_cluster_timed_out(cluster: &Cluster, at_time: Timestamp) -> bool {
        cluster.sent_probes == 0 && at_time - cluster.created_at > Self::PROBE_CLUSTER_TIMEOUT
    }

    fn drop_timed_out_clusters(&mut self, at_time: Timestamp) {
        while self
            .clusters
            .front()
            .is_some_and(|cluster| Self::is_cluster_timed_out(cluster, at_time))
        {
            let dropped = self.clusters.pop_front();
            tracing::info!(
                cluster_id = dropped.and_then(|c| c.pace_info.probe_cluster).map(|p| p.id),
                "probe cluster timed out"
            );
            self.total_failed_probe_count += 1;
        }
    }
}

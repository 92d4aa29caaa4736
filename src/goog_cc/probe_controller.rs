/*
 *  Copyright (c) 2016 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::api::{
    transport::{NetworkAvailability, ProbeClusterConfig},
    units::{DataRate, TimeDelta, Timestamp},
};

// WebRTC-Bwe-ProbingConfiguration
#[derive(Clone, Debug)]
pub struct ProbeControllerConfig {
    // These parameters configure the initial probes. First we send one or two
    // probes of sizes p1 * start_bitrate and p2 * start_bitrate.
    // Then whenever we get a bitrate estimate of at least further_probe_scale
    // times the size of the last sent probe we'll send another one of size
    // further_exponential_probe_scale times the new estimate.
    pub first_exponential_probe_scale: f64,   // p1
    pub second_exponential_probe_scale: f64,  // p2
    pub further_exponential_probe_scale: f64, // step_size
    pub further_probe_scale: f64,             // further_probe_threshold

    // Configures how often we send ALR probes and how big they are.
    pub alr_probing_interval: TimeDelta, // alr_interval
    pub alr_probe_scale: f64,            // alr_scale

    // Configures the probes emitted by changed to the allocated bitrate.
    pub first_allocation_probe_scale: f64,     // alloc_p1
    pub second_allocation_probe_scale: f64,    // alloc_p2
    pub allocation_allow_further_probing: bool, // alloc_probe_further
    pub allocation_probe_cap: DataRate,        // alloc_probe_max

    // Caps every probe at twice the max total allocated bitrate once one is known.
    pub limit_probes_with_allocatable_bitrate: bool, // limit_probe_target_rate_to_loss_bwe
}

impl Default for ProbeControllerConfig {
    fn default() -> Self {
        Self {
            first_exponential_probe_scale: 3.0,
            second_exponential_probe_scale: 6.0,
            further_exponential_probe_scale: 2.0,
            further_probe_scale: 0.7,
            alr_probing_interval: TimeDelta::from_seconds(5),
            alr_probe_scale: 2.0,
            first_allocation_probe_scale: 1.0,
            second_allocation_probe_scale: 2.0,
            allocation_allow_further_probing: false,
            allocation_probe_cap: DataRate::plus_infinity(),
            limit_probes_with_allocatable_bitrate: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ProbingState {
    // Initial state where no probing has been triggered yet.
    #[default]
    New,
    // Waiting for probing results to continue further probing.
    Waiting,
    // Probing is complete.
    Done,
}

/// A single probe towards a raised max bitrate, considered successful once
/// the estimate jumps past `success_threshold`.
#[derive(Clone, Copy, Debug, PartialEq)]
struct MidCallProbing {
    bitrate_to_probe: DataRate,
    success_threshold: DataRate,
}

/// Decides when to probe the link and at which bitrates.
#[derive(Clone, Debug)]
pub struct ProbeController {
    config: ProbeControllerConfig,

    state: ProbingState,
    network_available: bool,
    enable_periodic_alr_probing: bool,

    start_bitrate: DataRate,
    estimated_bitrate: DataRate,
    max_bitrate: DataRate,
    max_total_allocated_bitrate: DataRate,
    min_bitrate_to_probe_further: Option<DataRate>,

    time_last_probing_initiated: Timestamp,
    time_last_large_drop: Timestamp,
    time_last_probe_request: Timestamp,
    bitrate_before_last_large_drop: DataRate,

    alr_start_time: Option<Timestamp>,
    alr_end_time: Option<Timestamp>,

    mid_call_probing: Option<MidCallProbing>,
    next_probe_cluster_id: i32,
}

impl Default for ProbeController {
    fn default() -> Self {
        Self::new(ProbeControllerConfig::default())
    }
}

impl ProbeController {
    // The minimum number probing packets used.
    const MIN_PROBE_PACKETS_SENT: usize = 5;

    // The minimum probing duration.
    const MIN_PROBE_INTERVAL: TimeDelta = TimeDelta::from_millis(15);

    // Maximum waiting time from the time of initiating probing to getting
    // the measured results back.
    const MAX_WAITING_TIME_FOR_PROBING_RESULT: TimeDelta = TimeDelta::from_seconds(1);

    // Applied only when the application didn't specify a max bitrate.
    const DEFAULT_MAX_PROBING_BITRATE: DataRate = DataRate::from_kilobits_per_sec(5000);

    // If the bitrate drops to a factor `BITRATE_DROP_THRESHOLD` or lower
    // and we recover within `BITRATE_DROP_TIMEOUT`, then we'll send
    // a probe at a fraction `PROBE_FRACTION_AFTER_DROP` of the bitrate before the drop.
    const BITRATE_DROP_THRESHOLD: f64 = 0.66;
    const BITRATE_DROP_TIMEOUT: TimeDelta = TimeDelta::from_seconds(5);
    const PROBE_FRACTION_AFTER_DROP: f64 = 0.85;

    // Timeout for probing after leaving ALR.
    const ALR_ENDED_TIMEOUT: TimeDelta = TimeDelta::from_seconds(3);

    // Limits how often probing can be requested after a drop detected in ALR.
    const MIN_TIME_BETWEEN_ALR_PROBES: TimeDelta = TimeDelta::from_seconds(5);

    // The expected uncertainty of a probe result, as a fraction of the target
    // probe bitrate.
    const PROBE_UNCERTAINTY: f64 = 0.05;

    pub fn new(config: ProbeControllerConfig) -> Self {
        Self {
            config,
            state: ProbingState::New,
            network_available: true,
            enable_periodic_alr_probing: false,
            start_bitrate: DataRate::zero(),
            estimated_bitrate: DataRate::zero(),
            max_bitrate: DataRate::zero(),
            max_total_allocated_bitrate: DataRate::zero(),
            min_bitrate_to_probe_further: None,
            time_last_probing_initiated: Timestamp::minus_infinity(),
            time_last_large_drop: Timestamp::minus_infinity(),
            time_last_probe_request: Timestamp::minus_infinity(),
            bitrate_before_last_large_drop: DataRate::zero(),
            alr_start_time: None,
            alr_end_time: None,
            mid_call_probing: None,
            next_probe_cluster_id: 1,
        }
    }

    pub fn state(&self) -> ProbingState {
        self.state
    }

    pub fn set_enable_periodic_alr_probing(&mut self, enable: bool) {
        self.enable_periodic_alr_probing = enable;
    }

    pub fn set_alr_start_time(&mut self, start_time: Option<Timestamp>) {
        self.alr_start_time = start_time;
    }

    pub fn set_alr_end_time(&mut self, end_time: Timestamp) {
        self.alr_end_time = Some(end_time);
    }

    pub fn on_bitrates(
        &mut self,
        min_bitrate: DataRate,
        start_bitrate: DataRate,
        max_bitrate: DataRate,
        at_time: Timestamp,
    ) -> Vec<ProbeClusterConfig> {
        if start_bitrate > DataRate::zero() {
            self.start_bitrate = start_bitrate;
            self.estimated_bitrate = start_bitrate;
        } else if self.start_bitrate.is_zero() {
            self.start_bitrate = min_bitrate;
        }

        let old_max_bitrate = self.max_bitrate;
        self.max_bitrate = max_bitrate;

        match self.state {
            ProbingState::New => {
                if self.network_available && !self.start_bitrate.is_zero() {
                    return self.init_exponential_probing(at_time);
                }
            }
            ProbingState::Waiting => (),
            ProbingState::Done => {
                // If the new max bitrate is higher than both the old max bitrate and the
                // estimate then initiate probing. A jump of more than 20% in the estimate,
                // or an estimate within 90% of the new max, counts as success.
                if !self.estimated_bitrate.is_zero()
                    && old_max_bitrate < self.max_bitrate
                    && self.estimated_bitrate < self.max_bitrate
                {
                    self.mid_call_probing = Some(MidCallProbing {
                        bitrate_to_probe: max_bitrate,
                        success_threshold: std::cmp::min(
                            self.estimated_bitrate * 1.2,
                            max_bitrate * 0.9,
                        ),
                    });
                    return self.init_probing(at_time, &[max_bitrate], false);
                }
            }
        }
        vec![]
    }

    // The total bitrate, as opposed to the max bitrate, is the sum of the
    // configured bitrates for all active streams.
    pub fn on_max_total_allocated_bitrate(
        &mut self,
        max_total_allocated_bitrate: DataRate,
        at_time: Timestamp,
    ) -> Vec<ProbeClusterConfig> {
        let in_alr = self.alr_start_time.is_some();
        let allow_allocation_probe = in_alr;

        if allow_allocation_probe
            && self.state == ProbingState::Done
            && max_total_allocated_bitrate != self.max_total_allocated_bitrate
            && !self.estimated_bitrate.is_zero()
            && (self.max_bitrate.is_infinite() || self.estimated_bitrate < self.max_bitrate)
            && self.estimated_bitrate < max_total_allocated_bitrate
        {
            self.max_total_allocated_bitrate = max_total_allocated_bitrate;

            if self.config.first_allocation_probe_scale <= 0.0 {
                return vec![];
            }

            let probe_cap = self.config.allocation_probe_cap;
            let first_probe_bitrate = std::cmp::min(
                max_total_allocated_bitrate * self.config.first_allocation_probe_scale,
                probe_cap,
            );
            let mut probes = vec![first_probe_bitrate];
            if self.config.second_allocation_probe_scale > 0.0 {
                let second_probe_bitrate = std::cmp::min(
                    max_total_allocated_bitrate * self.config.second_allocation_probe_scale,
                    probe_cap,
                );
                if second_probe_bitrate > first_probe_bitrate {
                    probes.push(second_probe_bitrate);
                }
            }
            let probe_further = self.config.allocation_allow_further_probing;
            return self.init_probing(at_time, &probes, probe_further);
        }

        self.max_total_allocated_bitrate = max_total_allocated_bitrate;
        vec![]
    }

    pub fn on_network_availability(&mut self, msg: NetworkAvailability) -> Vec<ProbeClusterConfig> {
        self.network_available = msg.network_available;

        if !self.network_available && self.state == ProbingState::Waiting {
            tracing::info!("network went down while waiting for probe results");
            self.state = ProbingState::Done;
            self.min_bitrate_to_probe_further = None;
        }

        if self.network_available
            && self.state == ProbingState::New
            && !self.start_bitrate.is_zero()
        {
            return self.init_exponential_probing(msg.at_time);
        }
        vec![]
    }

    pub fn on_estimated_bitrate(
        &mut self,
        estimate: DataRate,
        at_time: Timestamp,
    ) -> Vec<ProbeClusterConfig> {
        if let Some(mid_call_probing) = self.mid_call_probing {
            if estimate > mid_call_probing.success_threshold {
                tracing::debug!(
                    probed = ?mid_call_probing.bitrate_to_probe,
                    ?estimate,
                    "mid call probing succeeded"
                );
                self.mid_call_probing = None;
            }
        }

        let mut pending_probes = vec![];
        if self.state == ProbingState::Waiting {
            if let Some(min_bitrate_to_probe_further) = self.min_bitrate_to_probe_further {
                tracing::info!(
                    "Measured bitrate: {:?} Minimum to probe further: {:?}",
                    estimate,
                    min_bitrate_to_probe_further
                );
                if estimate > min_bitrate_to_probe_further {
                    let further_probe_bitrate =
                        estimate * self.config.further_exponential_probe_scale;
                    pending_probes = self.init_probing(at_time, &[further_probe_bitrate], true);
                }
            }
        }

        if estimate < self.estimated_bitrate * Self::BITRATE_DROP_THRESHOLD {
            self.time_last_large_drop = at_time;
            self.bitrate_before_last_large_drop = self.estimated_bitrate;
        }
        self.estimated_bitrate = estimate;
        pending_probes
    }

    pub fn on_periodic_process(&mut self, at_time: Timestamp) -> Vec<ProbeClusterConfig> {
        if at_time - self.time_last_probing_initiated > Self::MAX_WAITING_TIME_FOR_PROBING_RESULT {
            self.mid_call_probing = None;
            if self.state == ProbingState::Waiting {
                tracing::info!("kWaitingForProbingResult: timeout");
                self.state = ProbingState::Done;
                self.min_bitrate_to_probe_further = None;
            }
        }

        if self.enable_periodic_alr_probing && self.state == ProbingState::Done {
            if let Some(alr_start_time) = self.alr_start_time {
                if !self.estimated_bitrate.is_zero() {
                    let next_probe_time =
                        std::cmp::max(alr_start_time, self.time_last_probing_initiated)
                            + self.config.alr_probing_interval;
                    if at_time >= next_probe_time {
                        let bitrate = self.estimated_bitrate * self.config.alr_probe_scale;
                        return self.init_probing(at_time, &[bitrate], true);
                    }
                }
            }
        }
        vec![]
    }

    /// Called once the estimate recovered from a large drop. Initiates a single
    /// probe session at a fraction of the bitrate seen before the drop.
    pub fn request_probe(&mut self, at_time: Timestamp) -> Vec<ProbeClusterConfig> {
        let in_alr = self.alr_start_time.is_some();
        let alr_ended_recently = self
            .alr_end_time
            .is_some_and(|end| at_time - end < Self::ALR_ENDED_TIMEOUT);
        if (in_alr || alr_ended_recently) && self.state == ProbingState::Done {
            let suggested_probe =
                self.bitrate_before_last_large_drop * Self::PROBE_FRACTION_AFTER_DROP;
            let min_expected_probe_result = suggested_probe * (1.0 - Self::PROBE_UNCERTAINTY);
            let time_since_drop = at_time - self.time_last_large_drop;
            let time_since_probe = at_time - self.time_last_probe_request;
            if min_expected_probe_result > self.estimated_bitrate
                && time_since_drop < Self::BITRATE_DROP_TIMEOUT
                && time_since_probe > Self::MIN_TIME_BETWEEN_ALR_PROBES
            {
                tracing::info!("Detected big bandwidth drop, start probing.");
                self.time_last_probe_request = at_time;
                return self.init_probing(at_time, &[suggested_probe], false);
            }
        }
        vec![]
    }

    /// Resets the bitrates, keeping the periodic ALR probing flag, the ALR start
    /// time and network availability.
    pub fn reset(&mut self, at_time: Timestamp) {
        self.state = ProbingState::New;
        self.start_bitrate = DataRate::zero();
        self.estimated_bitrate = DataRate::zero();
        self.max_bitrate = DataRate::zero();
        self.max_total_allocated_bitrate = DataRate::zero();
        self.min_bitrate_to_probe_further = None;
        self.time_last_probing_initiated = Timestamp::minus_infinity();
        self.time_last_large_drop = at_time;
        self.time_last_probe_request = at_time;
        self.bitrate_before_last_large_drop = DataRate::zero();
        self.mid_call_probing = None;
        self.alr_end_time = None;
    }

    fn init_exponential_probing(&mut self, at_time: Timestamp) -> Vec<ProbeClusterConfig> {
        debug_assert_eq!(self.state, ProbingState::New);
        debug_assert!(!self.start_bitrate.is_zero());

        // When probing at 1.8 Mbps (6x 300), this represents a threshold of
        // 1.2 Mbps to continue probing.
        let mut probes = vec![];
        if self.config.first_exponential_probe_scale > 0.0 {
            probes.push(self.start_bitrate * self.config.first_exponential_probe_scale);
        }
        if self.config.second_exponential_probe_scale > 0.0 {
            probes.push(self.start_bitrate * self.config.second_exponential_probe_scale);
        }
        tracing::info!(start_bitrate = ?self.start_bitrate, "exponential probing started");
        self.init_probing(at_time, &probes, true)
    }

    fn init_probing(
        &mut self,
        at_time: Timestamp,
        bitrates_to_probe: &[DataRate],
        mut probe_further: bool,
    ) -> Vec<ProbeClusterConfig> {
        let mut max_probe_bitrate = if self.max_bitrate.is_zero() || self.max_bitrate.is_infinite()
        {
            Self::DEFAULT_MAX_PROBING_BITRATE
        } else {
            self.max_bitrate
        };
        if self.config.limit_probes_with_allocatable_bitrate
            && self.max_total_allocated_bitrate > DataRate::zero()
        {
            // If a max allocated bitrate has been configured, allow probing up to 2x
            // that rate. This allows some overhead to account for bursty streams,
            // which otherwise would have to ramp up when the overshoot is already in
            // progress.
            max_probe_bitrate =
                std::cmp::min(max_probe_bitrate, self.max_total_allocated_bitrate * 2i64);
        }

        let mut max_requested = DataRate::zero();
        let mut pending_probes = Vec::with_capacity(bitrates_to_probe.len());
        for &bitrate in bitrates_to_probe {
            debug_assert!(bitrate >= DataRate::zero());
            let target_bitrate = if bitrate > max_probe_bitrate {
                // The max probe bitrate gets probed, nothing further to learn.
                probe_further = false;
                max_probe_bitrate
            } else {
                bitrate
            };
            max_requested = std::cmp::max(max_requested, bitrate);
            pending_probes.push(ProbeClusterConfig {
                id: self.next_probe_cluster_id,
                target_bitrate,
                target_probe_count: Self::MIN_PROBE_PACKETS_SENT,
                target_interval: Self::MIN_PROBE_INTERVAL,
                at_time,
            });
            self.next_probe_cluster_id += 1;
        }
        self.time_last_probing_initiated = at_time;

        if probe_further {
            self.state = ProbingState::Waiting;
            // Don't expect probe results to be larger than a fraction of the
            // actual probe rate.
            self.min_bitrate_to_probe_further = (!max_requested.is_zero())
                .then(|| max_requested * self.config.further_probe_scale);
        } else {
            self.state = ProbingState::Done;
            self.min_bitrate_to_probe_further = None;
        }
        tracing::debug!(?pending_probes, state = ?self.state, "probes initiated");
        pending_probes
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_trace::test;

    const MIN_BITRATE: DataRate = DataRate::from_bits_per_sec(100);
    const START_BITRATE: DataRate = DataRate::from_bits_per_sec(300);
    const MAX_BITRATE: DataRate = DataRate::from_bits_per_sec(10000);

    const EXPONENTIAL_PROBING_TIMEOUT: TimeDelta = TimeDelta::from_seconds(5);
    const ALR_PROBE_INTERVAL: TimeDelta = TimeDelta::from_seconds(5);
    const ALR_ENDED_TIMEOUT: TimeDelta = TimeDelta::from_seconds(3);
    const BITRATE_DROP_TIMEOUT: TimeDelta = TimeDelta::from_seconds(5);

    const START: Timestamp = Timestamp::from_millis(1_000_000);

    #[test]
    fn init_probing_start() {
        let mut probe_controller = ProbeController::default();
        let probes = probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);
        assert!(probes.len() >= 2);
        assert_eq!(probes[0].target_bitrate, DataRate::from_bits_per_sec(900));
        assert_eq!(probes[1].target_bitrate, DataRate::from_bits_per_sec(1800));
        assert_eq!(probes[0].id, 1);
        assert_eq!(probes[1].id, 2);
        assert_eq!(probes[0].target_probe_count, 5);
        assert_eq!(probes[0].target_interval, TimeDelta::from_millis(15));
        assert_eq!(probe_controller.state(), ProbingState::Waiting);
    }

    #[test]
    fn probing_waits_for_network() {
        let mut probe_controller = ProbeController::default();
        assert!(probe_controller
            .on_network_availability(NetworkAvailability {
                network_available: false,
                at_time: START,
            })
            .is_empty());
        assert!(probe_controller
            .on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START)
            .is_empty());

        let probes = probe_controller.on_network_availability(NetworkAvailability {
            network_available: true,
            at_time: START,
        });
        assert_eq!(probes.len(), 2);
    }

    #[test]
    fn network_down_stops_waiting_for_results() {
        let mut probe_controller = ProbeController::default();
        probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);
        probe_controller.on_network_availability(NetworkAvailability {
            network_available: false,
            at_time: START,
        });
        assert_eq!(probe_controller.state(), ProbingState::Done);
        assert!(probe_controller
            .on_estimated_bitrate(DataRate::from_bits_per_sec(1800), START)
            .is_empty());
    }

    #[test]
    fn mid_call_probing_on_max_bitrate_increase() {
        let mut probe_controller = ProbeController::default();
        probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);

        let new_max_bitrate = MAX_BITRATE + DataRate::from_bits_per_sec(100);
        // Long enough to time out exponential probing.
        let now = START + EXPONENTIAL_PROBING_TIMEOUT;
        probe_controller.on_estimated_bitrate(START_BITRATE, now);
        assert!(probe_controller.on_periodic_process(now).is_empty());

        let probes = probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, new_max_bitrate, now);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].target_bitrate, new_max_bitrate);
    }

    #[test]
    fn probes_on_max_allocated_bitrate_increase_only_when_in_alr() {
        let mut probe_controller = ProbeController::default();
        probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);
        probe_controller.on_estimated_bitrate(MAX_BITRATE - DataRate::from_bits_per_sec(1), START);

        // Wait long enough to time out exponential probing.
        let now = START + EXPONENTIAL_PROBING_TIMEOUT;
        assert!(probe_controller.on_periodic_process(now).is_empty());

        // Probe when in alr.
        probe_controller.set_alr_start_time(Some(now));
        let probes = probe_controller
            .on_max_total_allocated_bitrate(MAX_BITRATE + DataRate::from_bits_per_sec(1), now);
        assert_eq!(probes.len(), 2);

        // Do not probe when not in alr.
        probe_controller.set_alr_start_time(None);
        assert!(probe_controller
            .on_max_total_allocated_bitrate(MAX_BITRATE + DataRate::from_bits_per_sec(2), now)
            .is_empty());
    }

    #[test]
    fn initiates_probing_on_max_bitrate_increase_at_max_bitrate() {
        let mut probe_controller = ProbeController::default();
        probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);
        // Long enough to time out exponential probing.
        let now = START + EXPONENTIAL_PROBING_TIMEOUT;
        probe_controller.on_estimated_bitrate(START_BITRATE, now);
        probe_controller.on_periodic_process(now);
        probe_controller.on_estimated_bitrate(MAX_BITRATE, now);

        let new_max_bitrate = MAX_BITRATE + DataRate::from_bits_per_sec(100);
        let probes = probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, new_max_bitrate, now);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].target_bitrate, new_max_bitrate);
    }

    #[test]
    fn test_exponential_probing() {
        let mut probe_controller = ProbeController::default();
        probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);

        // Repeated probe should only be sent when estimated bitrate climbs above
        // 0.7 * 6 * START_BITRATE = 1260.
        assert!(probe_controller
            .on_estimated_bitrate(DataRate::from_bits_per_sec(1000), START)
            .is_empty());

        let probes =
            probe_controller.on_estimated_bitrate(DataRate::from_bits_per_sec(1800), START);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].target_bitrate, DataRate::from_bits_per_sec(2 * 1800));
    }

    #[test]
    fn test_exponential_probing_timeout() {
        let mut probe_controller = ProbeController::default();
        probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);
        // Advance far enough to cause a time out in waiting for probing result.
        let now = START + EXPONENTIAL_PROBING_TIMEOUT;
        probe_controller.on_periodic_process(now);
        assert_eq!(probe_controller.state(), ProbingState::Done);

        assert!(probe_controller
            .on_estimated_bitrate(DataRate::from_bits_per_sec(1800), now)
            .is_empty());
    }

    #[test]
    fn request_probe_in_alr() {
        let mut probe_controller = ProbeController::default();
        let probes = probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);
        assert!(probes.len() >= 2);
        let estimated_bitrate = DataRate::from_bits_per_sec(500);
        probe_controller.on_estimated_bitrate(estimated_bitrate, START);

        probe_controller.set_alr_start_time(Some(START));
        let now = START + ALR_PROBE_INTERVAL + TimeDelta::from_millis(1);
        probe_controller.on_periodic_process(now);
        // 500 -> 250 is below the drop threshold.
        probe_controller.on_estimated_bitrate(DataRate::from_bits_per_sec(250), now);
        let probes = probe_controller.request_probe(now);

        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].target_bitrate, estimated_bitrate * 0.85);
    }

    #[test]
    fn request_probe_when_alr_ended_recently() {
        let mut probe_controller = ProbeController::default();
        let probes = probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);
        assert_eq!(probes.len(), 2);
        let estimated_bitrate = DataRate::from_bits_per_sec(500);
        probe_controller.on_estimated_bitrate(estimated_bitrate, START);

        probe_controller.set_alr_start_time(None);
        let now = START + ALR_PROBE_INTERVAL + TimeDelta::from_millis(1);
        probe_controller.on_periodic_process(now);
        probe_controller.on_estimated_bitrate(DataRate::from_bits_per_sec(250), now);
        probe_controller.set_alr_end_time(now);
        let now = now + ALR_ENDED_TIMEOUT - TimeDelta::from_millis(1);
        let probes = probe_controller.request_probe(now);

        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].target_bitrate, estimated_bitrate * 0.85);
    }

    #[test]
    fn request_probe_when_alr_not_ended_recently() {
        let mut probe_controller = ProbeController::default();
        let probes = probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);
        assert_eq!(probes.len(), 2);
        probe_controller.on_estimated_bitrate(DataRate::from_bits_per_sec(500), START);

        probe_controller.set_alr_start_time(None);
        let now = START + ALR_PROBE_INTERVAL + TimeDelta::from_millis(1);
        probe_controller.on_periodic_process(now);
        probe_controller.on_estimated_bitrate(DataRate::from_bits_per_sec(250), now);
        probe_controller.set_alr_end_time(now);
        let now = now + ALR_ENDED_TIMEOUT + TimeDelta::from_millis(1);
        assert!(probe_controller.request_probe(now).is_empty());
    }

    #[test]
    fn request_probe_when_bwe_drop_not_recent() {
        let mut probe_controller = ProbeController::default();
        let probes = probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);
        assert_eq!(probes.len(), 2);
        probe_controller.on_estimated_bitrate(DataRate::from_bits_per_sec(500), START);

        probe_controller.set_alr_start_time(Some(START));
        let now = START + ALR_PROBE_INTERVAL + TimeDelta::from_millis(1);
        probe_controller.on_periodic_process(now);
        probe_controller.on_estimated_bitrate(DataRate::from_bits_per_sec(250), now);
        let now = now + BITRATE_DROP_TIMEOUT + TimeDelta::from_millis(1);
        assert!(probe_controller.request_probe(now).is_empty());
    }

    #[test]
    fn request_probe_limited_by_min_time_between_requests() {
        let mut probe_controller = ProbeController::default();
        probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);
        probe_controller.on_estimated_bitrate(DataRate::from_bits_per_sec(500), START);
        probe_controller.set_alr_start_time(Some(START));
        let now = START + ALR_PROBE_INTERVAL + TimeDelta::from_millis(1);
        probe_controller.on_periodic_process(now);
        probe_controller.on_estimated_bitrate(DataRate::from_bits_per_sec(250), now);
        assert_eq!(probe_controller.request_probe(now).len(), 1);
        assert!(probe_controller
            .request_probe(now + TimeDelta::from_millis(100))
            .is_empty());
    }

    #[test]
    fn periodic_probing() {
        let mut probe_controller = ProbeController::default();
        probe_controller.set_enable_periodic_alr_probing(true);
        let probes = probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);
        assert_eq!(probes.len(), 2);
        let estimated_bitrate = DataRate::from_bits_per_sec(500);
        assert!(probe_controller
            .on_estimated_bitrate(estimated_bitrate, START)
            .is_empty());

        // Expect the controller to send a new probe after 5s has passed.
        probe_controller.set_alr_start_time(Some(START));
        let now = START + TimeDelta::from_seconds(5);
        let probes = probe_controller.on_periodic_process(now);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].target_bitrate, DataRate::from_bits_per_sec(1000));
        probe_controller.on_estimated_bitrate(estimated_bitrate, now);

        // The following probe should be sent at 10s into ALR.
        let now = now + TimeDelta::from_seconds(4);
        assert!(probe_controller.on_periodic_process(now).is_empty());
        probe_controller.on_estimated_bitrate(estimated_bitrate, now);

        let now = now + TimeDelta::from_seconds(1);
        assert_eq!(probe_controller.on_periodic_process(now).len(), 1);
        assert!(probe_controller
            .on_estimated_bitrate(estimated_bitrate, now)
            .is_empty());
    }

    #[test]
    fn periodic_probing_after_reset() {
        let mut probe_controller = ProbeController::default();
        probe_controller.set_alr_start_time(Some(START));
        probe_controller.set_enable_periodic_alr_probing(true);
        probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, START);
        probe_controller.reset(START);

        let now = START + TimeDelta::from_seconds(10);
        // Since bitrates are not yet set, no probe is sent even though we are in ALR.
        assert!(probe_controller.on_periodic_process(now).is_empty());

        let probes = probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, MAX_BITRATE, now);
        assert_eq!(probes.len(), 2);

        // The start bitrate is used as the estimate until one is reported.
        let now = now + TimeDelta::from_seconds(10);
        let probes = probe_controller.on_periodic_process(now);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].target_bitrate, START_BITRATE * 2i64);
    }

    #[test]
    fn test_exponential_probing_overflow() {
        let mut probe_controller = ProbeController::default();
        let multiplier = DataRate::from_bits_per_sec(1_000_000);
        let start_bitrate = multiplier * 10i64;
        let max_bitrate = multiplier * 100i64;
        probe_controller.on_bitrates(MIN_BITRATE, start_bitrate, max_bitrate, START);

        // Repeated probe is sent when estimated bitrate climbs above
        // 0.7 * 6 * start_bitrate = 42 * multiplier.
        let probes = probe_controller.on_estimated_bitrate(multiplier * 60i64, START);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].target_bitrate, max_bitrate);
        // The probe bitrate is capped at the max bitrate.
        assert!(probe_controller
            .on_estimated_bitrate(max_bitrate, START)
            .is_empty());
    }

    #[test]
    fn default_max_probing_bitrate_without_max() {
        let mut probe_controller = ProbeController::default();
        let probes = probe_controller.on_bitrates(
            MIN_BITRATE,
            DataRate::from_kilobits_per_sec(1000),
            DataRate::plus_infinity(),
            START,
        );
        assert_eq!(probes[0].target_bitrate, DataRate::from_kilobits_per_sec(3000));
        assert_eq!(probes[1].target_bitrate, DataRate::from_kilobits_per_sec(5000));
        // Capped, nothing further to probe.
        assert_eq!(probe_controller.state(), ProbingState::Done);
    }

    #[test]
    fn test_allocated_bitrate_cap() {
        let mut probe_controller = ProbeController::default();
        let multiplier = DataRate::from_bits_per_sec(1_000_000);
        let start_bitrate = multiplier * 10i64;
        let max_bitrate = multiplier * 100i64;
        probe_controller.on_bitrates(MIN_BITRATE, start_bitrate, max_bitrate, START);

        // Configure ALR for periodic probing.
        probe_controller.set_enable_periodic_alr_probing(true);
        probe_controller.set_alr_start_time(Some(START));

        let estimated_bitrate = max_bitrate / 10i64;
        assert!(probe_controller
            .on_estimated_bitrate(estimated_bitrate, START)
            .is_empty());

        // Set a max allocated bitrate below the current estimate.
        let max_allocated_bitrate = estimated_bitrate - multiplier;
        assert!(probe_controller
            .on_max_total_allocated_bitrate(max_allocated_bitrate, START)
            .is_empty());

        // Probes such as ALR capped at 2x the max allocation limit.
        let now = START + TimeDelta::from_seconds(5);
        let probes = probe_controller.on_periodic_process(now);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].target_bitrate, max_allocated_bitrate * 2i64);

        // Remove allocation limit.
        assert!(probe_controller
            .on_max_total_allocated_bitrate(DataRate::zero(), now)
            .is_empty());
        let now = now + TimeDelta::from_seconds(5);
        let probes = probe_controller.on_periodic_process(now);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].target_bitrate, estimated_bitrate * 2i64);
    }

    #[test]
    fn configurable_probing() {
        let mut probe_controller = ProbeController::new(ProbeControllerConfig {
            first_exponential_probe_scale: 2.0,
            second_exponential_probe_scale: 5.0,
            further_exponential_probe_scale: 3.0,
            further_probe_scale: 0.8,
            first_allocation_probe_scale: 2.0,
            second_allocation_probe_scale: 0.0,
            ..Default::default()
        });
        let max_bitrate = DataRate::from_bits_per_sec(5_000_000);
        let probes = probe_controller.on_bitrates(MIN_BITRATE, START_BITRATE, max_bitrate, START);
        assert_eq!(probes.len(), 2);
        assert_eq!(probes[0].target_bitrate, START_BITRATE * 2i64);
        assert_eq!(probes[1].target_bitrate, START_BITRATE * 5i64);

        // Repeated probe should only be sent when estimated bitrate climbs above
        // 0.8 * 5 * START_BITRATE = 1200.
        assert!(probe_controller
            .on_estimated_bitrate(DataRate::from_bits_per_sec(1100), START)
            .is_empty());

        let estimate = DataRate::from_bits_per_sec(1250);
        let probes = probe_controller.on_estimated_bitrate(estimate, START);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].target_bitrate, estimate * 3i64);

        let now = START + TimeDelta::from_seconds(5);
        probe_controller.on_periodic_process(now);

        probe_controller.set_alr_start_time(Some(now));
        let max_total_allocated_bitrate = DataRate::from_bits_per_sec(200_000);
        let probes =
            probe_controller.on_max_total_allocated_bitrate(max_total_allocated_bitrate, now);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].target_bitrate, max_total_allocated_bitrate * 2i64);
    }
}

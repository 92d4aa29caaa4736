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
    api::{
        transport::PacedPacketInfo,
        units::{DataRate, DataSize, TimeDelta, Timestamp},
    },
    pacing::{
        BitrateProber, BitrateProberConfig, IntervalBudget, PacingError, PacketQueue, PacketToSend,
        PacketType,
    },
    rtc::SequenceChecker,
};

/// Default cap on the expected queue time when draining large queues.
pub const MAX_EXPECTED_QUEUE_TIME: TimeDelta = TimeDelta::from_seconds(2);

/// Where paced packets go. Called synchronously from
/// [`PacingController::process_packets`].
pub trait PacketSender {
    fn send_packet(&mut self, packet: PacketToSend, pacing_info: &PacedPacketInfo);

    /// FEC packets generated while protecting the packets sent so far.
    fn fetch_fec_packets(&mut self) -> Vec<PacketToSend>;

    /// Padding packets adding up to about `target_size`. May return nothing if
    /// padding isn't available.
    fn generate_padding(&mut self, target_size: DataSize) -> Vec<PacketToSend>;
}

#[derive(Clone, Debug)]
pub struct PacingSettings {
    // Pace audio like any other media instead of sending it right away.
    pub pace_audio: bool, // WebRTC-Pacer-BlockAudio
    // Raise the media rate when needed to keep the queue time under the cap.
    pub drain_large_queue: bool, // WebRTC-Pacer-DrainQueue
    pub ignore_transport_overhead: bool, // WebRTC-Pacer-IgnoreTransportOverhead
    // Keep sending heartbeat padding even when no media has been sent.
    pub send_padding_if_silent: bool, // WebRTC-Pacer-PadInSilence
    // Amount of padding requested at a time, expressed at the padding rate.
    pub padding_target_duration: TimeDelta, // WebRTC-Pacer-DynamicPaddingTarget
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            pace_audio: false,
            drain_large_queue: true,
            ignore_transport_overhead: false,
            send_padding_if_silent: false,
            padding_target_duration: TimeDelta::from_millis(5),
        }
    }
}

/// Sends packets out at the configured pacing rate, inserts padding at the
/// padding rate and drives the probe clusters of the [`BitrateProber`].
///
/// The controller owns no clock or timer. The host calls
/// [`process_packets`](Self::process_packets) at or after
/// [`next_send_time`](Self::next_send_time).
#[derive(Debug)]
pub struct PacingController<S: PacketSender> {
    settings: PacingSettings,
    sender: S,
    sequence_checker: SequenceChecker,
    prober: BitrateProber,
    packet_queue: PacketQueue,

    media_budget: IntervalBudget,
    padding_budget: IntervalBudget,
    pacing_bitrate: DataRate,

    paused: bool,
    congestion_window: Option<DataSize>,
    inflight_bytes: DataSize,
    probing_send_failure: bool,
    account_for_audio: bool,
    queue_time_cap: TimeDelta,

    packet_counter: u64,
    last_process_time: Timestamp,
    last_send_time: Timestamp,
    first_sent_packet_time: Option<Timestamp>,
}

impl<S: PacketSender> PacingController<S> {
    /// Interval between heartbeat packets while congested, paused or idle.
    pub const CONGESTED_PACKET_INTERVAL: TimeDelta = TimeDelta::from_millis(500);
    pub const PAUSED_PROCESS_INTERVAL: TimeDelta = Self::CONGESTED_PACKET_INTERVAL;
    // Upper bound on the time the budgets are credited for at once.
    const MAX_ELAPSED_TIME: TimeDelta = TimeDelta::from_seconds(2);
    // Allow probes to be processed slightly ahead of their scheduled time.
    const MAX_EARLY_PROBE_PROCESSING: TimeDelta = TimeDelta::from_millis(1);

    // Dispatch priorities, lowest first.
    const PROBE_START_PRIORITY: i32 = 0;
    const AUDIO_PRIORITY: i32 = 1;
    const RETRANSMISSION_PRIORITY: i32 = 2;
    const VIDEO_PRIORITY: i32 = 3;
    const PADDING_PRIORITY: i32 = 4;

    pub fn new(
        settings: PacingSettings,
        prober_config: BitrateProberConfig,
        sender: S,
        now: Timestamp,
    ) -> Self {
        if settings.pace_audio {
            tracing::warn!("Pacing audio, expect increased audio latency");
        }
        Self {
            settings,
            sender,
            sequence_checker: SequenceChecker::detached(),
            prober: BitrateProber::new(prober_config),
            packet_queue: PacketQueue::new(now),
            media_budget: IntervalBudget::new(DataRate::zero(), false),
            padding_budget: IntervalBudget::new(DataRate::zero(), false),
            pacing_bitrate: DataRate::zero(),
            paused: false,
            congestion_window: None,
            inflight_bytes: DataSize::zero(),
            probing_send_failure: false,
            account_for_audio: false,
            queue_time_cap: MAX_EXPECTED_QUEUE_TIME,
            packet_counter: 0,
            last_process_time: now,
            last_send_time: now,
            first_sent_packet_time: None,
        }
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn sender_mut(&mut self) -> &mut S {
        &mut self.sender
    }

    pub fn sequence_checker(&self) -> &SequenceChecker {
        &self.sequence_checker
    }

    /// Adds the packet to the queue and calls the sender when it's time to
    /// send it. Fails if no pacing rate has been configured yet.
    pub fn enqueue_packet(
        &mut self,
        packet: PacketToSend,
        now: Timestamp,
    ) -> Result<(), PacingError> {
        self.sequence_checker.check();
        if self.pacing_bitrate.is_zero() {
            tracing::warn!(
                ssrc = packet.ssrc,
                seq = packet.sequence_number,
                "SetPacingRates must be called before enqueueing packets"
            );
            return Err(PacingError::PacingRateNotSet);
        }
        let priority = Self::priority_for(packet.packet_type);
        self.enqueue_internal(packet, priority, now);
        Ok(())
    }

    pub fn add_probe_cluster(
        &mut self,
        cluster_id: i32,
        bitrate: DataRate,
        now: Timestamp,
    ) -> Result<(), PacingError> {
        self.sequence_checker.check();
        self.prober.add_probe_cluster(cluster_id, bitrate, now)
    }

    pub fn set_probing_enabled(&mut self, enabled: bool) {
        debug_assert_eq!(self.packet_counter, 0, "probing must be configured before sending");
        self.prober.set_enabled(enabled);
    }

    /// Temporarily stops sending media. Heartbeats keep flowing.
    pub fn pause(&mut self, now: Timestamp) {
        self.sequence_checker.check();
        if !self.paused {
            tracing::info!("PacedSender paused");
        }
        self.paused = true;
        self.packet_queue.set_pause_state(true, now);
    }

    pub fn resume(&mut self, now: Timestamp) {
        self.sequence_checker.check();
        if self.paused {
            tracing::info!("PacedSender resumed");
        }
        self.paused = false;
        self.packet_queue.set_pause_state(false, now);
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// `None` disables the congestion window.
    pub fn set_congestion_window(&mut self, congestion_window: Option<DataSize>, now: Timestamp) {
        let was_congested = self.is_congested();
        self.congestion_window = congestion_window;
        self.on_congestion_state_change(was_congested, now);
    }

    pub fn on_inflight_bytes(&mut self, inflight_bytes: DataSize, now: Timestamp) {
        let was_congested = self.is_congested();
        self.inflight_bytes = inflight_bytes;
        self.on_congestion_state_change(was_congested, now);
    }

    pub fn is_congested(&self) -> bool {
        self.congestion_window
            .is_some_and(|window| self.inflight_bytes >= window)
    }

    pub fn set_pacing_bitrates(&mut self, pacing_bitrate: DataRate, padding_bitrate: DataRate) {
        self.sequence_checker.check();
        debug_assert!(pacing_bitrate > DataRate::zero());
        self.pacing_bitrate = pacing_bitrate;
        self.media_budget.set_target_rate(pacing_bitrate);
        self.padding_budget.set_target_rate(padding_bitrate);
        tracing::debug!(?pacing_bitrate, ?padding_bitrate, "bwe:pacer_updated");
    }

    pub fn pacing_bitrate(&self) -> DataRate {
        self.pacing_bitrate
    }

    /// Counts audio against the media budget.
    pub fn set_account_for_audio_packets(&mut self, account_for_audio: bool) {
        self.account_for_audio = account_for_audio;
    }

    pub fn set_include_overhead(&mut self) {
        self.packet_queue.set_include_overhead();
    }

    pub fn set_transport_overhead(&mut self, overhead_per_packet: DataSize) {
        if self.settings.ignore_transport_overhead {
            return;
        }
        self.packet_queue.set_transport_overhead(overhead_per_packet);
    }

    /// Limit on the expected queue time enforced by draining large queues.
    pub fn set_queue_time_limit(&mut self, limit: TimeDelta) {
        self.queue_time_cap = limit;
    }

    pub fn is_probing(&self) -> bool {
        self.prober.is_probing()
    }

    pub fn num_queued_packets(&self) -> usize {
        self.packet_queue.num_packets()
    }

    pub fn queued_packet_size(&self) -> DataSize {
        self.packet_queue.queued_size()
    }

    pub fn oldest_packet_enqueue_time(&self) -> Option<Timestamp> {
        self.packet_queue.oldest_enqueue_time()
    }

    pub fn first_sent_packet_time(&self) -> Option<Timestamp> {
        self.first_sent_packet_time
    }

    /// Time needed to send everything in the queue at the pacing rate.
    pub fn expected_queue_time(&self) -> TimeDelta {
        let queued = self.packet_queue.queued_size();
        if queued.is_zero() {
            TimeDelta::zero()
        } else if self.pacing_bitrate.is_zero() {
            TimeDelta::plus_infinity()
        } else {
            queued / self.pacing_bitrate
        }
    }

    /// Earliest time at which `process_packets` has something to do.
    pub fn next_send_time(&self, now: Timestamp) -> Timestamp {
        if self.paused {
            return self.last_send_time + Self::PAUSED_PROCESS_INTERVAL;
        }

        // If probing is active, that always takes priority.
        if self.prober.is_probing() {
            let probe_time = self.prober.next_time_to_probe(now);
            if probe_time != Timestamp::plus_infinity() && !self.probing_send_failure {
                return probe_time;
            }
        }

        // Unpaced audio goes out as soon as it arrives.
        if !self.settings.pace_audio {
            if let Some(audio_enqueue_time) =
                self.packet_queue.leading_audio_packet_enqueue_time()
            {
                return audio_enqueue_time;
            }
        }

        // Nothing but heartbeats while congested or before the first packet.
        if self.is_congested() || self.packet_counter == 0 {
            return self.last_send_time + Self::CONGESTED_PACKET_INTERVAL;
        }

        if !self.media_budget.target_rate().is_zero() && !self.packet_queue.is_empty() {
            return std::cmp::min(
                self.last_send_time + Self::PAUSED_PROCESS_INTERVAL,
                self.last_process_time + self.media_budget.time_to_clear_debt(),
            );
        }

        if !self.padding_budget.target_rate().is_zero() && self.packet_queue.is_empty() {
            let drain_time = std::cmp::max(
                self.media_budget.time_to_clear_debt(),
                self.padding_budget.time_to_clear_debt(),
            );
            return std::cmp::min(
                self.last_send_time + Self::PAUSED_PROCESS_INTERVAL,
                self.last_process_time + drain_time,
            );
        }

        if self.settings.send_padding_if_silent {
            return self.last_send_time + Self::PAUSED_PROCESS_INTERVAL;
        }
        self.last_process_time + Self::PAUSED_PROCESS_INTERVAL
    }

    /// Sends whatever is due at `now`: heartbeats, queued media, probes and
    /// padding.
    pub fn process_packets(&mut self, now: Timestamp) {
        self.sequence_checker.check();
        let mut target_send_time = self.next_send_time(now);
        let early_execute_margin = if self.prober.is_probing() {
            Self::MAX_EARLY_PROBE_PROCESSING
        } else {
            TimeDelta::zero()
        };

        if target_send_time.is_minus_infinity() {
            target_send_time = now;
        } else if now < target_send_time - early_execute_margin {
            // Too early to send anything, just pay off debt.
            if let Some(elapsed) = self.update_process_time(now) {
                self.reduce_debt(elapsed);
            }
            return;
        }

        if target_send_time < self.last_process_time {
            // Catch up the budgets for the time between the target send time and
            // the last process time.
            tracing::warn!(
                ?target_send_time,
                last_process_time = ?self.last_process_time,
                "target send time before last process time"
            );
            self.reduce_debt(self.last_process_time - target_send_time);
            target_send_time = self.last_process_time;
        }

        let mut previous_process_time = self.last_process_time;
        let elapsed = self.update_process_time(now).unwrap_or(TimeDelta::zero());

        if self.is_time_to_send_heartbeat(now) {
            if self.packet_counter == 0 {
                // Nothing sent yet, keep waiting.
                self.last_send_time = now;
            } else {
                let padding = self.sender.generate_padding(DataSize::from_bytes(1));
                let mut padding_sent = DataSize::zero();
                for packet in padding {
                    padding_sent += packet.payload_and_padding_size();
                    self.sender.send_packet(packet, &PacedPacketInfo::default());
                    self.enqueue_fec_packets(now);
                }
                self.on_padding_sent(padding_sent, now);
            }
        }

        if self.paused {
            return;
        }

        if elapsed > TimeDelta::zero() {
            let mut target_rate = self.pacing_bitrate;
            let queued = self.packet_queue.queued_size();
            if !queued.is_zero() {
                // Assuming equal size packets and input/output rate, the average
                // packet has avg_time_left to get sent.
                self.packet_queue.update_queue_time(now);
                if self.settings.drain_large_queue {
                    let avg_time_left = std::cmp::max(
                        TimeDelta::from_millis(1),
                        self.queue_time_cap - self.packet_queue.average_queue_time(),
                    );
                    let min_rate_needed = queued / avg_time_left;
                    if min_rate_needed > target_rate {
                        target_rate = min_rate_needed;
                        tracing::trace!(?target_rate, "bwe:large_pacing_queue");
                    }
                }
            }
            self.media_budget.set_target_rate(target_rate);
        }

        let mut pacing_info = PacedPacketInfo::default();
        let mut recommended_probe_size = DataSize::zero();
        let mut first_packet_in_probe = false;
        let mut is_probing = self.prober.is_probing();
        if is_probing {
            match self.prober.next_probe_cluster(now) {
                Some(info) => {
                    first_packet_in_probe = info
                        .probe_cluster
                        .is_some_and(|cluster| cluster.bytes_sent.is_zero());
                    recommended_probe_size = self.prober.recommended_min_probe_size();
                    pacing_info = info;
                }
                // No valid probe cluster returned, probe might have timed out.
                None => is_probing = false,
            }
        }

        let mut data_sent = DataSize::zero();
        while !self.paused {
            if first_packet_in_probe {
                // A tiny padding packet opens the probe so that the first real
                // probe packet isn't delayed by media.
                let padding = self.sender.generate_padding(DataSize::from_bytes(1));
                debug_assert!(padding.len() <= 1);
                for packet in padding {
                    self.enqueue_internal(packet, Self::PROBE_START_PRIORITY, now);
                }
                first_packet_in_probe = false;
            }

            if previous_process_time < target_send_time {
                // Reduce the debt up to the target send time before sending.
                self.reduce_debt(target_send_time - previous_process_time);
                previous_process_time = target_send_time;
            }

            let Some(packet) = self.next_packet_to_send(&pacing_info, target_send_time, now) else {
                // No packet available to send, check if we should send padding.
                let padding_to_add = self.padding_size_to_add(recommended_probe_size, data_sent);
                if padding_to_add > DataSize::zero() {
                    let padding = self.sender.generate_padding(padding_to_add);
                    if !padding.is_empty() {
                        for packet in padding {
                            self.enqueue_internal(packet, Self::PADDING_PRIORITY, now);
                        }
                        // Continue loop to send the padding that was just added.
                        continue;
                    }
                }
                // Can't fetch new packet and no padding to send, exit send loop.
                break;
            };

            let packet_type = packet.packet_type;
            let mut packet_size = packet.payload_and_padding_size();
            if self.packet_queue.include_overhead() {
                packet_size += packet.header_size + self.packet_queue.transport_overhead();
            }
            self.sender.send_packet(packet, &pacing_info);
            self.enqueue_fec_packets(now);

            data_sent += packet_size;
            self.on_media_sent(packet_type, packet_size, target_send_time);

            // Probes are sent back to back until the recommended size is reached.
            if is_probing && data_sent >= recommended_probe_size {
                break;
            }

            // Update target send time in case that there are more packets that we
            // are late in processing.
            let next_send_time = self.next_send_time(now);
            target_send_time = if next_send_time.is_minus_infinity() {
                now
            } else {
                std::cmp::min(now, next_send_time)
            };
        }

        self.last_process_time = std::cmp::max(self.last_process_time, previous_process_time);

        if is_probing {
            self.probing_send_failure = data_sent.is_zero();
            if !self.probing_send_failure {
                self.prober.on_probe_sent(data_sent, now);
            }
        }
    }

    fn priority_for(packet_type: PacketType) -> i32 {
        match packet_type {
            PacketType::Audio => Self::AUDIO_PRIORITY,
            PacketType::Retransmission => Self::RETRANSMISSION_PRIORITY,
            PacketType::Video | PacketType::ForwardErrorCorrection => Self::VIDEO_PRIORITY,
            PacketType::Padding => Self::PADDING_PRIORITY,
        }
    }

    fn enqueue_internal(&mut self, packet: PacketToSend, priority: i32, now: Timestamp) {
        self.prober
            .on_incoming_packet(packet.payload_and_padding_size(), now);

        if self.packet_queue.is_empty() {
            // If the queue is empty, we need to "fast-forward" the last process
            // time, so that we don't use passed time as budget for sending the
            // first new packet.
            let mut target_process_time = now;
            let next_send_time = self.next_send_time(now);
            if next_send_time.is_finite() {
                // There was already a valid planned send time, such as a keep-alive.
                // Use that as last process time only if it's prior to now.
                target_process_time = std::cmp::min(now, next_send_time);
            }
            match self.update_process_time(target_process_time) {
                Some(elapsed) if elapsed > TimeDelta::zero() => self.reduce_debt(elapsed),
                _ => self.last_process_time = target_process_time,
            }
        }

        self.packet_queue.push(priority, now, self.packet_counter, packet);
        self.packet_counter += 1;
    }

    fn enqueue_fec_packets(&mut self, now: Timestamp) {
        for fec_packet in self.sender.fetch_fec_packets() {
            if let Err(err) = self.enqueue_packet(fec_packet, now) {
                tracing::warn!(%err, "dropping fec packet");
            }
        }
    }

    // Advances the last process time, returning the elapsed time unless `now`
    // is before it.
    fn update_process_time(&mut self, now: Timestamp) -> Option<TimeDelta> {
        if self.last_process_time.is_minus_infinity() || now < self.last_process_time {
            return None;
        }
        let mut elapsed = now - self.last_process_time;
        self.last_process_time = now;
        if elapsed > Self::MAX_ELAPSED_TIME {
            tracing::warn!(
                ?elapsed,
                limit = ?Self::MAX_ELAPSED_TIME,
                "elapsed time is longer than expected, limiting"
            );
            elapsed = Self::MAX_ELAPSED_TIME;
        }
        Some(elapsed)
    }

    fn is_time_to_send_heartbeat(&self, now: Timestamp) -> bool {
        if self.settings.send_padding_if_silent
            || self.paused
            || self.is_congested()
            || self.packet_counter == 0
        {
            // We send a padding packet every 500 ms to ensure we won't get stuck
            // in congested state due to no feedback being received.
            return now - self.last_send_time >= Self::CONGESTED_PACKET_INTERVAL;
        }
        false
    }

    fn next_packet_to_send(
        &mut self,
        pacing_info: &PacedPacketInfo,
        target_send_time: Timestamp,
        now: Timestamp,
    ) -> Option<PacketToSend> {
        if self.packet_queue.is_empty() {
            return None;
        }

        let unpaced_audio_packet = !self.settings.pace_audio
            && self.packet_queue.leading_audio_packet_enqueue_time().is_some();
        if !unpaced_audio_packet && !pacing_info.is_probe() {
            if self.is_congested() {
                // Don't send anything if congested.
                return None;
            }
            if now <= target_send_time
                && now + self.media_budget.time_to_clear_debt() > target_send_time
            {
                // We are not behind schedule and there's still debt to pay off.
                return None;
            }
        }

        self.packet_queue.pop()
    }

    fn padding_size_to_add(
        &self,
        recommended_probe_size: DataSize,
        data_sent: DataSize,
    ) -> DataSize {
        if !self.packet_queue.is_empty() {
            // Actual payload available, no need to add padding.
            return DataSize::zero();
        }
        if self.is_congested() {
            // Don't add padding if congested, even if requested for probing.
            return DataSize::zero();
        }
        if self.packet_counter == 0 {
            // We can not send padding unless a normal packet has first been sent.
            return DataSize::zero();
        }

        if !recommended_probe_size.is_zero() {
            return recommended_probe_size.saturating_sub(data_sent);
        }

        let padding_rate = self.padding_budget.target_rate();
        if padding_rate > DataRate::zero() && self.padding_budget.debt().is_zero() {
            return padding_rate * self.settings.padding_target_duration;
        }
        DataSize::zero()
    }

    fn on_media_sent(
        &mut self,
        packet_type: PacketType,
        packet_size: DataSize,
        send_time: Timestamp,
    ) {
        self.first_sent_packet_time.get_or_insert(send_time);
        if packet_type != PacketType::Audio || self.account_for_audio {
            self.add_debt(packet_size);
        }
        self.last_send_time = send_time;
        self.last_process_time = send_time;
    }

    fn on_padding_sent(&mut self, padding_sent: DataSize, now: Timestamp) {
        if !padding_sent.is_zero() {
            self.add_debt(padding_sent);
        }
        self.last_send_time = now;
        self.last_process_time = now;
    }

    fn add_debt(&mut self, size: DataSize) {
        self.inflight_bytes += size;
        self.media_budget.use_budget(size);
        self.padding_budget.use_budget(size);
    }

    fn reduce_debt(&mut self, elapsed: TimeDelta) {
        self.media_budget.reduce_debt(elapsed);
        self.padding_budget.reduce_debt(elapsed);
    }

    fn on_congestion_state_change(&mut self, was_congested: bool, now: Timestamp) {
        if was_congested && !self.is_congested() {
            if let Some(elapsed) = self.update_process_time(now) {
                self.reduce_debt(elapsed);
            }
        }
    }
}

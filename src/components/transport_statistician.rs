/*
 *  Copyright (c) 2015 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::collections::BTreeMap;

use crate::{
    api::{
        transport::{PacedPacketInfo, PacketResult, SentPacket, TransportPacketsFeedback},
        units::{DataSize, TimeDelta, Timestamp},
    },
    rtc::{SequenceChecker, SequenceNumberUnwrapper},
};

/// A packet handed to the transport, before it has been sent.
#[derive(Debug, Clone, Copy)]
pub struct PacketSendInfo {
    pub transport_sequence_number: u16,
    pub size: DataSize,
    pub is_audio: bool,
    pub pacing_info: PacedPacketInfo,
}

/// Notification that a packet left the socket.
#[derive(Debug, Clone, Copy)]
pub struct SentPacketInfo {
    /// `None` for packets not covered by transport feedback.
    pub transport_sequence_number: Option<u16>,
    pub send_time: Timestamp,
    pub size: DataSize,
    /// Whether an untracked packet counts towards the bitrate allocation.
    pub included_in_allocation: bool,
}

/// One entry of a decoded transport feedback message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketStatus {
    pub transport_sequence_number: u16,
    /// Arrival time at the remote end, `None` if the packet wasn't received.
    pub arrival_time: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy)]
struct PacketFeedback {
    creation_time: Timestamp,
    sent: SentPacket,
}

/// Send side bookkeeping that matches transport feedback with the packets it
/// reports on and keeps track of the bytes in flight.
#[derive(Debug)]
pub struct TransportStatistician {
    sequence_checker: SequenceChecker,
    unwrapper: SequenceNumberUnwrapper,
    history: BTreeMap<i64, PacketFeedback>,
    last_acked_packet_id: Option<i64>,
    in_flight_bytes: DataSize,
    last_send_time: Timestamp,
    last_untracked_send_time: Timestamp,
    pending_untracked_bytes: DataSize,
    last_feedback_time: Timestamp,
}

impl Default for TransportStatistician {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportStatistician {
    const HISTORY_WINDOW: TimeDelta = TimeDelta::from_seconds(60);

    pub fn new() -> Self {
        Self {
            sequence_checker: SequenceChecker::detached(),
            unwrapper: SequenceNumberUnwrapper::new(),
            history: BTreeMap::new(),
            last_acked_packet_id: None,
            in_flight_bytes: DataSize::zero(),
            last_send_time: Timestamp::minus_infinity(),
            last_untracked_send_time: Timestamp::minus_infinity(),
            pending_untracked_bytes: DataSize::zero(),
            last_feedback_time: Timestamp::minus_infinity(),
        }
    }

    pub fn in_flight_bytes(&self) -> DataSize {
        self.sequence_checker.check();
        self.in_flight_bytes
    }

    pub fn add_packet(&mut self, packet_info: PacketSendInfo, overhead: DataSize, now: Timestamp) {
        self.sequence_checker.check();
        let packet_id = self.unwrapper.unwrap(packet_info.transport_sequence_number);

        while let Some(oldest) = self.history.first_entry() {
            if now - oldest.get().creation_time <= Self::HISTORY_WINDOW {
                break;
            }
            let evicted = oldest.remove();
            if self.is_in_flight(&evicted.sent) {
                self.in_flight_bytes = self.in_flight_bytes.saturating_sub(evicted.sent.size);
            }
        }

        self.history.insert(
            packet_id,
            PacketFeedback {
                creation_time: now,
                sent: SentPacket {
                    size: packet_info.size + overhead,
                    pacing_info: packet_info.pacing_info,
                    is_audio: packet_info.is_audio,
                    packet_id,
                    ..Default::default()
                },
            },
        );
    }

    /// Stamps the send time on a tracked packet. Returns the sent packet the
    /// first time it is sent, `None` for retransmissions and untracked packets.
    pub fn process_sent_packet(&mut self, sent_packet: SentPacketInfo) -> Option<SentPacket> {
        self.sequence_checker.check();
        let Some(sequence_number) = sent_packet.transport_sequence_number else {
            if sent_packet.included_in_allocation {
                if sent_packet.send_time < self.last_send_time {
                    tracing::warn!("ignoring untracked data for out of order packet");
                }
                self.pending_untracked_bytes += sent_packet.size;
                self.last_untracked_send_time =
                    std::cmp::max(self.last_untracked_send_time, sent_packet.send_time);
            }
            return None;
        };

        let packet_id = self.unwrapper.unwrap(sequence_number);
        let last_acked_packet_id = self.last_acked_packet_id;
        let feedback = self.history.get_mut(&packet_id)?;

        let retransmit = feedback.sent.send_time.is_finite();
        feedback.sent.send_time = sent_packet.send_time;
        self.last_send_time = std::cmp::max(self.last_send_time, sent_packet.send_time);

        if !self.pending_untracked_bytes.is_zero() {
            if sent_packet.send_time < self.last_untracked_send_time {
                let diff = self.last_untracked_send_time - sent_packet.send_time;
                tracing::warn!(?diff, "appending acknowledged data for out of order packet");
            }
            feedback.sent.prior_unacked_bytes += self.pending_untracked_bytes;
            self.pending_untracked_bytes = DataSize::zero();
        }

        if retransmit {
            return None;
        }
        if last_acked_packet_id.map_or(true, |last| packet_id > last) {
            self.in_flight_bytes += feedback.sent.size;
        }
        feedback.sent.bytes_in_flight = self.in_flight_bytes;
        Some(feedback.sent)
    }

    /// Matches the statuses of a feedback message with the sent packets.
    /// Returns `None` when nothing in the message could be used.
    pub fn process_transport_feedback(
        &mut self,
        packets: &[PacketStatus],
        receive_time: Timestamp,
    ) -> Option<TransportPacketsFeedback> {
        self.sequence_checker.check();
        if packets.is_empty() {
            tracing::warn!("received an empty transport feedback");
            return None;
        }
        if receive_time < self.last_feedback_time {
            tracing::warn!(
                ?receive_time,
                last = ?self.last_feedback_time,
                "ignoring stale transport feedback"
            );
            return None;
        }
        self.last_feedback_time = receive_time;

        let mut report = TransportPacketsFeedback {
            receive_time,
            prior_in_flight: self.in_flight_bytes,
            ..Default::default()
        };

        let mut num_unknown = 0;
        for status in packets {
            let packet_id = self.unwrapper.unwrap(status.transport_sequence_number);
            self.advance_last_acked(packet_id);

            let Some(feedback) = self.history.get(&packet_id) else {
                num_unknown += 1;
                continue;
            };
            if feedback.sent.send_time.is_infinite() {
                tracing::warn!(packet_id, "received feedback before packet was indicated as sent");
                continue;
            }

            let mut result = PacketResult {
                sent_packet: feedback.sent,
                ..Default::default()
            };
            // Lost packets stay in the history since a later feedback may still
            // report them as received.
            if let Some(arrival_time) = status.arrival_time {
                result.recv_time = arrival_time;
                self.history.remove(&packet_id);
                report.last_acked_recv_time =
                    std::cmp::max(report.last_acked_recv_time, arrival_time);
            }
            report.packet_feedbacks.push(result);
        }

        if num_unknown > 0 {
            tracing::warn!(
                num_unknown,
                "failed to lookup send time for packets, send time history too small?"
            );
        }
        if report.packet_feedbacks.is_empty() {
            return None;
        }

        if let Some(first_unacked) = self.first_unacked_send_time() {
            report.first_unacked_send_time = first_unacked;
        }
        report.bytes_in_flight = self.in_flight_bytes;
        Some(report)
    }

    fn is_in_flight(&self, packet: &SentPacket) -> bool {
        packet.send_time.is_finite()
            && self
                .last_acked_packet_id
                .map_or(true, |last| packet.packet_id > last)
    }

    fn advance_last_acked(&mut self, packet_id: i64) {
        if self.last_acked_packet_id.is_some_and(|last| packet_id <= last) {
            return;
        }
        let acked = match self.last_acked_packet_id {
            Some(last) => self.history.range(last + 1..=packet_id),
            None => self.history.range(..=packet_id),
        }
        .filter(|(_, feedback)| feedback.sent.send_time.is_finite())
        .fold(DataSize::zero(), |sum, (_, feedback)| sum + feedback.sent.size);
        self.in_flight_bytes = self.in_flight_bytes.saturating_sub(acked);
        self.last_acked_packet_id = Some(packet_id);
    }

    fn first_unacked_send_time(&self) -> Option<Timestamp> {
        let unacked = match self.last_acked_packet_id {
            Some(last) => self.history.range(last + 1..),
            None => self.history.range(..),
        };
        unacked
            .map(|(_, feedback)| feedback.sent.send_time)
            .find(|send_time| send_time.is_finite())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const START: Timestamp = Timestamp::from_millis(10_000);
    const PACKET_SIZE: DataSize = DataSize::from_bytes(1000);

    fn send_info(sequence_number: u16) -> PacketSendInfo {
        PacketSendInfo {
            transport_sequence_number: sequence_number,
            size: PACKET_SIZE,
            is_audio: false,
            pacing_info: PacedPacketInfo::default(),
        }
    }

    fn sent(sequence_number: u16, send_time: Timestamp) -> SentPacketInfo {
        SentPacketInfo {
            transport_sequence_number: Some(sequence_number),
            send_time,
            size: PACKET_SIZE,
            included_in_allocation: false,
        }
    }

    fn received(sequence_number: u16, arrival_time: Timestamp) -> PacketStatus {
        PacketStatus {
            transport_sequence_number: sequence_number,
            arrival_time: Some(arrival_time),
        }
    }

    fn lost(sequence_number: u16) -> PacketStatus {
        PacketStatus {
            transport_sequence_number: sequence_number,
            arrival_time: None,
        }
    }

    fn add_and_send(
        statistician: &mut TransportStatistician,
        sequence_numbers: std::ops::Range<u16>,
    ) {
        for seq in sequence_numbers {
            let send_time = START + TimeDelta::from_millis(seq as i64);
            statistician.add_packet(send_info(seq), DataSize::zero(), send_time);
            statistician.process_sent_packet(sent(seq, send_time));
        }
    }

    #[test]
    fn tracks_bytes_in_flight() {
        let mut statistician = TransportStatistician::new();
        for seq in 1..4 {
            statistician.add_packet(send_info(seq), DataSize::from_bytes(40), START);
            let sent_packet = statistician
                .process_sent_packet(sent(seq, START))
                .expect("first send");
            assert_eq!(sent_packet.packet_id, seq as i64);
            assert_eq!(sent_packet.size, DataSize::from_bytes(1040));
            assert_eq!(sent_packet.bytes_in_flight, DataSize::from_bytes(1040) * seq as i64);
        }
        assert_eq!(statistician.in_flight_bytes(), DataSize::from_bytes(3120));

        let arrival = START + TimeDelta::from_millis(50);
        let report = statistician
            .process_transport_feedback(
                &[received(1, arrival), received(2, arrival)],
                START + TimeDelta::from_millis(60),
            )
            .expect("report");
        assert_eq!(report.prior_in_flight, DataSize::from_bytes(3120));
        assert_eq!(report.bytes_in_flight, DataSize::from_bytes(1040));
        assert_eq!(report.packet_feedbacks.len(), 2);
        assert_eq!(report.last_acked_recv_time, arrival);
        assert_eq!(report.first_unacked_send_time, START);
        assert_eq!(statistician.in_flight_bytes(), DataSize::from_bytes(1040));
    }

    #[test]
    fn retransmission_is_not_reported_again() {
        let mut statistician = TransportStatistician::new();
        statistician.add_packet(send_info(1), DataSize::zero(), START);
        assert!(statistician.process_sent_packet(sent(1, START)).is_some());
        assert!(statistician
            .process_sent_packet(sent(1, START + TimeDelta::from_millis(10)))
            .is_none());
        assert_eq!(statistician.in_flight_bytes(), PACKET_SIZE);
    }

    #[test]
    fn untracked_bytes_are_folded_into_next_packet() {
        let mut statistician = TransportStatistician::new();
        let untracked = SentPacketInfo {
            transport_sequence_number: None,
            send_time: START,
            size: DataSize::from_bytes(200),
            included_in_allocation: true,
        };
        assert!(statistician.process_sent_packet(untracked).is_none());
        // Untracked packets outside the allocation are ignored.
        statistician.process_sent_packet(SentPacketInfo {
            included_in_allocation: false,
            ..untracked
        });

        statistician.add_packet(send_info(1), DataSize::zero(), START);
        let sent_packet = statistician
            .process_sent_packet(sent(1, START + TimeDelta::from_millis(1)))
            .expect("first send");
        assert_eq!(sent_packet.prior_unacked_bytes, DataSize::from_bytes(200));
    }

    #[test]
    fn lost_packets_can_be_received_later() {
        let mut statistician = TransportStatistician::new();
        add_and_send(&mut statistician, 1..3);

        let arrival = START + TimeDelta::from_millis(40);
        let report = statistician
            .process_transport_feedback(
                &[lost(1), received(2, arrival)],
                START + TimeDelta::from_millis(50),
            )
            .expect("report");
        assert_eq!(report.lost_packets().count(), 1);
        assert_eq!(report.received_packets().count(), 1);
        assert_eq!(report.bytes_in_flight, DataSize::zero());

        let late_arrival = START + TimeDelta::from_millis(45);
        let report = statistician
            .process_transport_feedback(
                &[received(1, late_arrival)],
                START + TimeDelta::from_millis(100),
            )
            .expect("report");
        assert_eq!(report.received_packets().count(), 1);
        assert_eq!(report.packet_feedbacks[0].sent_packet.packet_id, 1);
        assert_eq!(report.packet_feedbacks[0].recv_time, late_arrival);
    }

    #[test]
    fn unusable_feedback_is_ignored() {
        let mut statistician = TransportStatistician::new();
        assert!(statistician.process_transport_feedback(&[], START).is_none());

        add_and_send(&mut statistician, 1..2);
        // Never registered.
        assert!(statistician
            .process_transport_feedback(&[received(7, START)], START + TimeDelta::from_millis(10))
            .is_none());

        // Registered but not sent yet.
        statistician.add_packet(send_info(8), DataSize::zero(), START);
        assert!(statistician
            .process_transport_feedback(&[received(8, START)], START + TimeDelta::from_millis(20))
            .is_none());
    }

    #[test]
    fn stale_feedback_is_ignored() {
        let mut statistician = TransportStatistician::new();
        add_and_send(&mut statistician, 1..3);
        let arrival = START + TimeDelta::from_millis(30);
        assert!(statistician
            .process_transport_feedback(
                &[received(2, arrival)],
                START + TimeDelta::from_millis(100),
            )
            .is_some());
        assert!(statistician
            .process_transport_feedback(&[received(1, arrival)], START + TimeDelta::from_millis(90))
            .is_none());
    }

    #[test]
    fn old_history_is_evicted() {
        let mut statistician = TransportStatistician::new();
        add_and_send(&mut statistician, 1..3);
        assert_eq!(statistician.in_flight_bytes(), PACKET_SIZE * 2i64);

        let later = START + TimeDelta::from_seconds(61);
        statistician.add_packet(send_info(3), DataSize::zero(), later);
        assert_eq!(statistician.in_flight_bytes(), DataSize::zero());

        // Feedback for evicted packets can't be matched any more.
        assert!(statistician
            .process_transport_feedback(&[received(1, later)], later + TimeDelta::from_millis(10))
            .is_none());
    }
}

/*
 *  Copyright (c) 2021 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::collections::VecDeque;

// PacketArrivalTimeMap is an optimized map of packet id to packet arrival
// time, limited in size to never exceed `MAX_NUMBER_OF_PACKETS`. It will grow
// as needed, and remove old packets, and will expand to allow earlier packets
// to be added (out-of-order).
//
// Not yet received packets have no arrival time. All received packets have
// a positive arrival time.
#[derive(Debug, Clone, Default)]
pub struct PacketArrivalTimeMap {
    // Deque representing unwrapped packet ids and their arrival times, in ms.
    arrival_times: VecDeque<Option<i64>>,
    // The unwrapped packet id of the first element in `arrival_times`.
    begin_packet_id: i64,
    has_received_packet: bool,
}

impl PacketArrivalTimeMap {
    /// Bounds the span of ids held, received or not.
    pub const MAX_NUMBER_OF_PACKETS: usize = 1 << 15;

    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first packet id in the map.
    pub fn begin_packet_id(&self) -> i64 {
        self.begin_packet_id
    }

    /// Returns the one-past-last packet id in the map.
    pub fn end_packet_id(&self) -> i64 {
        self.begin_packet_id + self.arrival_times.len() as i64
    }

    /// Arrival time of `packet_id`, if it has been received and is still in
    /// the map.
    pub fn at(&self, packet_id: i64) -> Option<i64> {
        let offset = usize::try_from(packet_id - self.begin_packet_id).ok()?;
        self.arrival_times.get(offset).copied().flatten()
    }

    pub fn has_received(&self, packet_id: i64) -> bool {
        self.at(packet_id).is_some()
    }

    /// Records the arrival time of a packet.
    pub fn add_packet(&mut self, packet_id: i64, arrival_time_ms: i64) {
        debug_assert!(arrival_time_ms > 0);
        if !self.has_received_packet {
            self.has_received_packet = true;
            self.begin_packet_id = packet_id;
            self.arrival_times.push_back(Some(arrival_time_ms));
            return;
        }

        let mut offset = packet_id - self.begin_packet_id;
        if offset >= 0 && (offset as usize) < self.arrival_times.len() {
            // Within the buffer, no need to expand it.
            self.arrival_times[offset as usize] = Some(arrival_time_ms);
            return;
        }

        if offset < 0 {
            // Goes before the current buffer. Expand to add it, but only if it
            // fits within the maximum number of packets.
            let missing_packets = offset.unsigned_abs() as usize;
            if missing_packets + self.arrival_times.len() > Self::MAX_NUMBER_OF_PACKETS {
                tracing::warn!(
                    "Packet {} is out of order, and adding it would drop newer packets, ignoring it.",
                    packet_id
                );
                return;
            }
            for _ in 1..missing_packets {
                self.arrival_times.push_front(None);
            }
            self.arrival_times.push_front(Some(arrival_time_ms));
            self.begin_packet_id = packet_id;
            return;
        }

        // Goes after the buffer.
        if offset as usize >= Self::MAX_NUMBER_OF_PACKETS {
            // The buffer would grow too large, old packets have to be removed.
            let mut packets_to_remove = offset as usize - Self::MAX_NUMBER_OF_PACKETS + 1;
            if packets_to_remove >= self.arrival_times.len() {
                self.arrival_times.clear();
                self.begin_packet_id = packet_id;
                offset = 0;
            } else {
                // Also trim the leading not received packets, so the buffer
                // starts with a received packet.
                while packets_to_remove < self.arrival_times.len()
                    && self.arrival_times[packets_to_remove].is_none()
                {
                    packets_to_remove += 1;
                }
                self.arrival_times.drain(..packets_to_remove);
                self.begin_packet_id += packets_to_remove as i64;
                offset -= packets_to_remove as i64;
                debug_assert!(offset as usize >= self.arrival_times.len());
            }
        }

        // Packets can be received out of order. If this isn't the next
        // continuous packet, fill the gap with not received ones.
        let missing_gap_packets = offset as usize - self.arrival_times.len();
        self.arrival_times
            .extend(std::iter::repeat(None).take(missing_gap_packets));
        debug_assert_eq!(self.arrival_times.len(), offset as usize);
        self.arrival_times.push_back(Some(arrival_time_ms));
        debug_assert!(self.arrival_times.len() <= Self::MAX_NUMBER_OF_PACKETS);
    }

    /// Removes packets from the beginning of the map, up to but not including
    /// `packet_id`.
    pub fn erase_to(&mut self, packet_id: i64) {
        if packet_id > self.begin_packet_id {
            let packets_to_remove = std::cmp::min(
                (packet_id - self.begin_packet_id) as usize,
                self.arrival_times.len(),
            );
            self.arrival_times.drain(..packets_to_remove);
            self.begin_packet_id += packets_to_remove as i64;
        }
    }

    /// Removes packets from the beginning of the map as long as they are
    /// before `packet_id` and arrived no later than `arrival_time_ms`.
    pub fn remove_old_packets(&mut self, packet_id: i64, arrival_time_ms: i64) {
        while self.begin_packet_id < packet_id {
            match self.arrival_times.front() {
                Some(Some(arrival)) if *arrival > arrival_time_ms => break,
                Some(_) => {
                    self.arrival_times.pop_front();
                    self.begin_packet_id += 1;
                }
                None => break,
            }
        }
    }

    /// Clamps `packet_id` to `[begin_packet_id, end_packet_id]`.
    pub fn clamp(&self, packet_id: i64) -> i64 {
        packet_id.clamp(self.begin_packet_id(), self.end_packet_id())
    }
}

/*
 *  Copyright (c) 2018 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BinaryHeap},
};

use crate::{
    api::units::{DataSize, TimeDelta, Timestamp},
    pacing::{PacketToSend, PacketType},
};

#[derive(Debug)]
struct QueuedPacket {
    // Lower numbers are sent first.
    priority: i32,
    enqueue_time: Timestamp,
    // The enqueue time minus the total pause time at the moment of enqueueing.
    adjusted_enqueue_time: Timestamp,
    enqueue_order: u64,
    packet: PacketToSend,
}

impl PartialEq for QueuedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedPacket {}

impl PartialOrd for QueuedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedPacket {
    // The greatest element is popped first from the heap.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.enqueue_order.cmp(&self.enqueue_order))
    }
}

/// Priority queue of packets waiting to be paced out. Packets leave in
/// priority order, first in first out within the same priority. Tracks how
/// long packets have been waiting, excluding time spent paused.
#[derive(Debug)]
pub struct PacketQueue {
    packets: BinaryHeap<QueuedPacket>,
    // The enqueue time of every packet currently in the queue.
    enqueue_times: BTreeMap<Timestamp, usize>,
    time_last_updated: Timestamp,
    paused: bool,
    size: DataSize,
    queue_time_sum: TimeDelta,
    pause_time_sum: TimeDelta,
    include_overhead: bool,
    transport_overhead: DataSize,
}

impl PacketQueue {
    pub fn new(start_time: Timestamp) -> Self {
        Self {
            packets: BinaryHeap::new(),
            enqueue_times: BTreeMap::new(),
            time_last_updated: start_time,
            paused: false,
            size: DataSize::zero(),
            queue_time_sum: TimeDelta::zero(),
            pause_time_sum: TimeDelta::zero(),
            include_overhead: false,
            transport_overhead: DataSize::zero(),
        }
    }

    pub fn push(
        &mut self,
        priority: i32,
        enqueue_time: Timestamp,
        enqueue_order: u64,
        packet: PacketToSend,
    ) {
        self.update_queue_time(enqueue_time);

        // In order to figure out how much time a packet has spent in the queue
        // while not in a paused state, we subtract the total amount of time the
        // queue has been paused so far, and when the packet is popped we subtract
        // the total amount of time the queue has been paused at that moment.
        let queued = QueuedPacket {
            priority,
            enqueue_time,
            adjusted_enqueue_time: enqueue_time - self.pause_time_sum,
            enqueue_order,
            packet,
        };
        self.size += self.packet_size(&queued.packet);
        *self.enqueue_times.entry(enqueue_time).or_default() += 1;
        self.packets.push(queued);
    }

    pub fn pop(&mut self) -> Option<PacketToSend> {
        let queued = self.packets.pop()?;

        let time_in_non_paused_state =
            self.time_last_updated - queued.adjusted_enqueue_time - self.pause_time_sum;
        self.queue_time_sum = std::cmp::max(
            self.queue_time_sum - time_in_non_paused_state,
            TimeDelta::zero(),
        );

        if let Some(count) = self.enqueue_times.get_mut(&queued.enqueue_time) {
            *count -= 1;
            if *count == 0 {
                self.enqueue_times.remove(&queued.enqueue_time);
            }
        }
        self.size = self.size.saturating_sub(self.packet_size(&queued.packet));
        if self.packets.is_empty() {
            self.size = DataSize::zero();
            self.queue_time_sum = TimeDelta::zero();
        }
        Some(queued.packet)
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn num_packets(&self) -> usize {
        self.packets.len()
    }

    pub fn queued_size(&self) -> DataSize {
        self.size
    }

    pub fn oldest_enqueue_time(&self) -> Option<Timestamp> {
        self.enqueue_times.keys().next().copied()
    }

    /// Enqueue time of the next packet if it is an audio packet.
    pub fn leading_audio_packet_enqueue_time(&self) -> Option<Timestamp> {
        self.packets
            .peek()
            .filter(|queued| queued.packet.packet_type == PacketType::Audio)
            .map(|queued| queued.enqueue_time)
    }

    pub fn update_queue_time(&mut self, now: Timestamp) {
        if now <= self.time_last_updated {
            if now < self.time_last_updated {
                tracing::warn!(?now, last = ?self.time_last_updated, "queue time moved backwards");
            }
            return;
        }
        let delta = now - self.time_last_updated;
        if self.paused {
            self.pause_time_sum += delta;
        } else {
            self.queue_time_sum += delta * self.packets.len();
        }
        self.time_last_updated = now;
    }

    pub fn set_pause_state(&mut self, paused: bool, now: Timestamp) {
        if self.paused == paused {
            return;
        }
        self.update_queue_time(now);
        self.paused = paused;
    }

    /// Average time spent in the queue while not paused.
    pub fn average_queue_time(&self) -> TimeDelta {
        if self.packets.is_empty() {
            return TimeDelta::zero();
        }
        self.queue_time_sum / self.packets.len() as i64
    }

    pub fn include_overhead(&self) -> bool {
        self.include_overhead
    }

    pub fn set_include_overhead(&mut self) {
        if self.include_overhead {
            return;
        }
        self.include_overhead = true;
        // Packets already queued were counted without their overhead.
        let overhead = self
            .packets
            .iter()
            .fold(DataSize::zero(), |sum, queued| {
                sum + queued.packet.header_size + self.transport_overhead
            });
        self.size += overhead;
    }

    pub fn transport_overhead(&self) -> DataSize {
        self.transport_overhead
    }

    pub fn set_transport_overhead(&mut self, overhead_per_packet: DataSize) {
        if self.include_overhead {
            let count = self.packets.len();
            self.size = self.size.saturating_sub(self.transport_overhead * count)
                + overhead_per_packet * count;
        }
        self.transport_overhead = overhead_per_packet;
    }

    fn packet_size(&self, packet: &PacketToSend) -> DataSize {
        let mut size = packet.payload_and_padding_size();
        if self.include_overhead {
            size += packet.header_size + self.transport_overhead;
        }
        size
    }
}

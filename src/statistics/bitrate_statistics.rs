/*
 *  Copyright (c) 2013 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::collections::VecDeque;

use crate::api::units::{DataRate, TimeDelta, Timestamp};

#[derive(Debug, Clone, Copy)]
struct Bucket {
    timestamp_ms: i64,
    sum: i64,
    num_samples: usize,
}

/// Sliding window byte counter with one bucket per millisecond.
///
/// The active window starts at the first sample and grows up to the
/// configured size, so a rate is available shortly after the first packets
/// rather than after a full window of silence.
#[derive(Debug, Clone)]
pub struct BitrateStatistics {
    buckets: VecDeque<Bucket>,
    accumulated_bytes: i64,
    overflow: bool,
    first_timestamp_ms: Option<i64>,
    num_samples: usize,
    max_window_ms: i64,
    current_window_ms: i64,
}

impl BitrateStatistics {
    // Bits per second from bytes per millisecond.
    const SCALE: f64 = 8000.0;

    pub fn new(max_window: TimeDelta) -> Self {
        assert!(max_window > TimeDelta::zero());
        Self {
            buckets: VecDeque::new(),
            accumulated_bytes: 0,
            overflow: false,
            first_timestamp_ms: None,
            num_samples: 0,
            max_window_ms: max_window.ms(),
            current_window_ms: max_window.ms(),
        }
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
        self.accumulated_bytes = 0;
        self.overflow = false;
        self.first_timestamp_ms = None;
        self.num_samples = 0;
        self.current_window_ms = self.max_window_ms;
    }

    /// Adds `bytes` observed at `now`.
    pub fn update(&mut self, bytes: i64, now: Timestamp) {
        debug_assert!(bytes >= 0);
        let mut now_ms = now.ms();
        self.erase_old(now_ms);

        // Silence longer than the window restarts the active window.
        if self.first_timestamp_ms.is_none() || self.num_samples == 0 {
            self.first_timestamp_ms = Some(now_ms);
        }

        match self.buckets.back() {
            Some(last) if last.timestamp_ms == now_ms => {}
            Some(last) if last.timestamp_ms > now_ms => {
                tracing::warn!(
                    "Timestamp {} ms is before the last added one {} ms, aligning to that.",
                    now_ms,
                    last.timestamp_ms
                );
                now_ms = last.timestamp_ms;
            }
            _ => self.buckets.push_back(Bucket {
                timestamp_ms: now_ms,
                sum: 0,
                num_samples: 0,
            }),
        }
        if let Some(last) = self.buckets.back_mut() {
            debug_assert_eq!(last.timestamp_ms, now_ms);
            last.sum = last.sum.saturating_add(bytes);
            last.num_samples += 1;
        }

        match self.accumulated_bytes.checked_add(bytes) {
            Some(sum) if sum < i64::MAX => self.accumulated_bytes = sum,
            _ => self.overflow = true,
        }
        self.num_samples += 1;
    }

    /// Returns the rate over the active window, or `None` when there is not
    /// enough data or the accumulator overflowed.
    pub fn rate(&mut self, now: Timestamp) -> Option<DataRate> {
        let now_ms = now.ms();
        self.erase_old(now_ms);

        let active_window_ms = match self.first_timestamp_ms {
            // The stream started before the window, count it as full.
            Some(first) if first <= now_ms - self.current_window_ms => self.current_window_ms,
            Some(first) => now_ms - first + 1,
            None => 0,
        };

        if self.num_samples == 0
            || active_window_ms <= 1
            || (self.num_samples <= 1 && active_window_ms < self.current_window_ms)
            || self.overflow
        {
            return None;
        }

        let result = self.accumulated_bytes as f64 * Self::SCALE / active_window_ms as f64 + 0.5;
        if result >= i64::MAX as f64 {
            return None;
        }
        Some(DataRate::from_bits_per_sec(result as i64))
    }

    /// Changes the window, which must be positive and no larger than the one
    /// given at construction.
    pub fn set_window_size(&mut self, window: TimeDelta, now: Timestamp) -> bool {
        let window_ms = window.ms();
        if window_ms <= 0 || window_ms > self.max_window_ms {
            return false;
        }
        let now_ms = now.ms();
        // Data removed by a smaller window must not turn into a region of
        // zeros when the window grows again.
        if let Some(first) = self.first_timestamp_ms {
            self.first_timestamp_ms = Some(first.max(now_ms - window_ms + 1));
        }
        self.current_window_ms = window_ms;
        self.erase_old(now_ms);
        true
    }

    pub fn accumulated_bytes(&self) -> i64 {
        self.accumulated_bytes
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn window_size(&self) -> TimeDelta {
        TimeDelta::from_millis(self.current_window_ms)
    }

    fn erase_old(&mut self, now_ms: i64) {
        // Oldest time still included in the window.
        let new_oldest_ms = now_ms - self.current_window_ms + 1;
        while let Some(oldest) = self.buckets.front() {
            if oldest.timestamp_ms >= new_oldest_ms {
                break;
            }
            self.accumulated_bytes = self.accumulated_bytes.saturating_sub(oldest.sum).max(0);
            self.num_samples -= oldest.num_samples;
            self.buckets.pop_front();
        }
    }
}

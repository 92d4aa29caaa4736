/*
 *  Copyright (c) 2018 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::api::units::{DataRate, DataSize, TimeDelta};

/// A token bucket over a fixed window. Credit accrues at the target rate and
/// is debited per byte sent. Both credit and debt are bounded by what the
/// target rate produces over one window.
#[derive(Debug, Clone)]
pub struct IntervalBudget {
    target_rate: DataRate,
    window: TimeDelta,
    max_bytes_in_budget: i64,
    // Negative when in debt.
    bytes_remaining: i64,
    can_build_up_underuse: bool,
}

impl IntervalBudget {
    pub const DEFAULT_WINDOW: TimeDelta = TimeDelta::from_millis(500);

    pub fn new(initial_target_rate: DataRate, can_build_up_underuse: bool) -> Self {
        Self::with_window(initial_target_rate, Self::DEFAULT_WINDOW, can_build_up_underuse)
    }

    pub fn with_window(
        initial_target_rate: DataRate,
        window: TimeDelta,
        can_build_up_underuse: bool,
    ) -> Self {
        assert!(window > TimeDelta::zero());
        let mut this = Self {
            target_rate: DataRate::zero(),
            window,
            max_bytes_in_budget: 0,
            bytes_remaining: 0,
            can_build_up_underuse,
        };
        this.set_target_rate(initial_target_rate);
        this
    }

    pub fn set_target_rate(&mut self, target_rate: DataRate) {
        self.target_rate = target_rate;
        self.max_bytes_in_budget = (self.target_rate * self.window).bytes();
        self.bytes_remaining = self
            .bytes_remaining
            .clamp(-self.max_bytes_in_budget, self.max_bytes_in_budget);
    }

    pub fn increase_budget(&mut self, delta_time: TimeDelta) {
        if delta_time <= TimeDelta::zero() {
            return;
        }
        let bytes = (self.target_rate * delta_time).bytes();
        if self.bytes_remaining < 0 || self.can_build_up_underuse {
            // We overused last interval, compensate this interval.
            self.bytes_remaining =
                std::cmp::min(self.bytes_remaining + bytes, self.max_bytes_in_budget);
        } else {
            // If we underused last interval we can't use it this interval.
            self.bytes_remaining = std::cmp::min(bytes, self.max_bytes_in_budget);
        }
    }

    /// Pays off debt without ever building up credit.
    pub fn reduce_debt(&mut self, delta_time: TimeDelta) {
        if delta_time <= TimeDelta::zero() || self.bytes_remaining >= 0 {
            return;
        }
        let bytes = (self.target_rate * delta_time).bytes();
        self.bytes_remaining = std::cmp::min(self.bytes_remaining + bytes, 0);
    }

    pub fn use_budget(&mut self, size: DataSize) {
        self.bytes_remaining =
            std::cmp::max(self.bytes_remaining - size.bytes(), -self.max_bytes_in_budget);
    }

    /// Unspent credit, zero while in debt.
    pub fn bytes_remaining(&self) -> DataSize {
        DataSize::from_bytes(self.bytes_remaining.max(0))
    }

    /// Outstanding debt, zero while there is credit left.
    pub fn debt(&self) -> DataSize {
        DataSize::from_bytes((-self.bytes_remaining).max(0))
    }

    /// Time until the current debt is paid off at the target rate.
    pub fn time_to_clear_debt(&self) -> TimeDelta {
        if self.bytes_remaining >= 0 || self.target_rate.is_zero() {
            return TimeDelta::zero();
        }
        self.debt() / self.target_rate
    }

    pub fn budget_ratio(&self) -> f64 {
        if self.max_bytes_in_budget == 0 {
            return 0.0;
        }
        self.bytes_remaining as f64 / self.max_bytes_in_budget as f64
    }

    pub fn target_rate(&self) -> DataRate {
        self.target_rate
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;

    const WINDOW_MS: i64 = 500;
    const TARGET_RATE: DataRate = DataRate::from_kilobits_per_sec(100);

    fn interval_bytes(rate: DataRate, interval_ms: i64) -> DataSize {
        rate * TimeDelta::from_millis(interval_ms)
    }

    #[test]
    fn initial_configuration() {
        for can_build_up in [false, true] {
            let budget = IntervalBudget::new(TARGET_RATE, can_build_up);
            assert_eq!(budget.budget_ratio(), 0.0);
            assert_eq!(budget.bytes_remaining(), DataSize::zero());
            assert_eq!(budget.debt(), DataSize::zero());
        }
    }

    #[test]
    fn underuse() {
        for can_build_up in [false, true] {
            let mut budget = IntervalBudget::new(TARGET_RATE, can_build_up);
            budget.increase_budget(TimeDelta::from_millis(50));
            budget.use_budget(DataSize::from_bytes(600));
            assert_eq!(budget.bytes_remaining(), DataSize::from_bytes(25));
            assert_relative_eq!(budget.budget_ratio(), 25.0 / 6250.0);

            budget.use_budget(DataSize::from_bytes(25));
            assert_eq!(budget.budget_ratio(), 0.0);
            assert_eq!(budget.bytes_remaining(), DataSize::zero());
        }
    }

    #[test]
    fn dont_underuse_more_than_max_window() {
        let mut budget = IntervalBudget::new(TARGET_RATE, false);
        budget.increase_budget(TimeDelta::from_millis(1000));
        assert_eq!(budget.budget_ratio(), 1.0);
        assert_eq!(budget.bytes_remaining(), interval_bytes(TARGET_RATE, WINDOW_MS));
    }

    #[test]
    fn dont_underuse_more_than_max_window_when_rate_drops() {
        let mut budget = IntervalBudget::new(TARGET_RATE, false);
        budget.increase_budget(TimeDelta::from_millis(WINDOW_MS / 2));
        budget.set_target_rate(TARGET_RATE / 10);
        assert_eq!(budget.budget_ratio(), 1.0);
        assert_eq!(budget.bytes_remaining(), interval_bytes(TARGET_RATE / 10, WINDOW_MS));
    }

    #[test]
    fn balance_kept_on_rate_increase() {
        let mut budget = IntervalBudget::new(TARGET_RATE, false);
        budget.increase_budget(TimeDelta::from_millis(WINDOW_MS));
        budget.set_target_rate(TARGET_RATE * 2);
        assert_eq!(budget.budget_ratio(), 0.5);
        assert_eq!(budget.bytes_remaining(), interval_bytes(TARGET_RATE, WINDOW_MS));
    }

    #[test]
    fn overuse_turns_into_debt() {
        let mut budget = IntervalBudget::new(TARGET_RATE, false);
        budget.use_budget(interval_bytes(TARGET_RATE, 50));
        assert_relative_eq!(budget.budget_ratio(), -0.1);
        assert_eq!(budget.bytes_remaining(), DataSize::zero());
        assert_eq!(budget.debt(), DataSize::from_bytes(625));
        assert_eq!(budget.time_to_clear_debt(), TimeDelta::from_millis(50));

        budget.increase_budget(TimeDelta::from_millis(20));
        assert_eq!(budget.debt(), DataSize::from_bytes(375));
    }

    #[test]
    fn reduce_debt_stops_at_zero() {
        let mut budget = IntervalBudget::new(TARGET_RATE, false);
        budget.reduce_debt(TimeDelta::from_millis(50));
        assert_eq!(budget.bytes_remaining(), DataSize::zero());

        budget.use_budget(DataSize::from_bytes(1000));
        budget.reduce_debt(TimeDelta::from_millis(40));
        assert_eq!(budget.debt(), DataSize::from_bytes(500));
        budget.reduce_debt(TimeDelta::from_millis(100));
        assert_eq!(budget.debt(), DataSize::zero());
        assert_eq!(budget.bytes_remaining(), DataSize::zero());
    }

    #[test]
    fn dont_overuse_more_than_max_window() {
        let mut budget = IntervalBudget::new(TARGET_RATE, false);
        budget.use_budget(interval_bytes(TARGET_RATE, 1000));
        assert_eq!(budget.budget_ratio(), -1.0);
        assert_eq!(budget.debt(), interval_bytes(TARGET_RATE, WINDOW_MS));
    }

    #[test]
    fn can_build_up_from_underuse_when_configured() {
        for can_build_up in [false, true] {
            let mut budget = IntervalBudget::new(TARGET_RATE, can_build_up);
            budget.increase_budget(TimeDelta::from_millis(50));
            assert_eq!(budget.bytes_remaining(), DataSize::from_bytes(625));

            budget.use_budget(DataSize::from_bytes(100));
            budget.increase_budget(TimeDelta::from_millis(50));

            if can_build_up {
                assert_eq!(budget.bytes_remaining(), DataSize::from_bytes(1150));
            } else {
                assert_eq!(budget.bytes_remaining(), DataSize::from_bytes(625));
            }
        }
    }
}

// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Activity reporting
//!
//! Each device tracks when activity was last observed (`last_recorded_time`)
//! and when an activity event was last emitted downstream
//! (`last_reported_time`). A strategy decides which occurrences are worth
//! reporting immediately and which wait for the end of the reporting period;
//! either way a report only fires when something was recorded since the last
//! report, so duplicates are never emitted.

use serde::{Deserialize, Serialize};

/// Which activity occurrences of a reporting period get reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityStrategyType {
    /// Report every occurrence.
    All,
    /// Report only the first occurrence of each period.
    First,
    /// Report only at period end.
    Last,
    /// Report the first occurrence and the period end.
    FirstAndLast,
}

impl ActivityStrategyType {
    pub fn strategy(&self) -> Box<dyn ActivityStrategy> {
        match self {
            ActivityStrategyType::All => Box::new(AllEvents),
            ActivityStrategyType::First => Box::new(FirstEvent::default()),
            ActivityStrategyType::Last => Box::new(LastEvent),
            ActivityStrategyType::FirstAndLast => {
                Box::new(FirstAndLastEvent::default())
            }
        }
    }
}

/// Per-device reporting policy. Stateful: `First`-style strategies remember
/// whether the current period already produced a report.
pub trait ActivityStrategy: Send + Sync {
    /// Whether this occurrence is eligible for immediate reporting.
    fn on_activity(&mut self) -> bool;

    /// Whether a report is eligible at the period boundary. Also resets any
    /// per-period state.
    fn on_reporting_period_end(&mut self) -> bool;
}

struct AllEvents;

impl ActivityStrategy for AllEvents {
    fn on_activity(&mut self) -> bool {
        true
    }

    fn on_reporting_period_end(&mut self) -> bool {
        true
    }
}

#[derive(Default)]
struct FirstEvent {
    reported: bool,
}

impl ActivityStrategy for FirstEvent {
    fn on_activity(&mut self) -> bool {
        if self.reported {
            false
        } else {
            self.reported = true;
            true
        }
    }

    fn on_reporting_period_end(&mut self) -> bool {
        self.reported = false;
        false
    }
}

struct LastEvent;

impl ActivityStrategy for LastEvent {
    fn on_activity(&mut self) -> bool {
        false
    }

    fn on_reporting_period_end(&mut self) -> bool {
        true
    }
}

#[derive(Default)]
struct FirstAndLastEvent {
    reported: bool,
}

impl ActivityStrategy for FirstAndLastEvent {
    fn on_activity(&mut self) -> bool {
        if self.reported {
            false
        } else {
            self.reported = true;
            true
        }
    }

    fn on_reporting_period_end(&mut self) -> bool {
        self.reported = false;
        true
    }
}

/// Activity record of one device, combined with its reporting strategy.
pub struct ActivityState {
    last_recorded_time: u64,
    last_reported_time: u64,
    strategy: Box<dyn ActivityStrategy>,
}

impl ActivityState {
    pub fn new(strategy_type: ActivityStrategyType) -> Self {
        Self {
            last_recorded_time: 0,
            last_reported_time: 0,
            strategy: strategy_type.strategy(),
        }
    }

    pub fn last_recorded_time(&self) -> u64 {
        self.last_recorded_time
    }

    pub fn last_reported_time(&self) -> u64 {
        self.last_reported_time
    }

    /// Records activity at `time`. Returns the timestamp to report downstream
    /// when the strategy wants this occurrence reported now.
    pub fn on_activity(&mut self, time: u64) -> Option<u64> {
        self.last_recorded_time = self.last_recorded_time.max(time);
        if self.strategy.on_activity() && self.due() {
            self.last_reported_time = self.last_recorded_time;
            Some(self.last_reported_time)
        } else {
            None
        }
    }

    /// Closes the current reporting period. Returns the timestamp to report
    /// when unreported activity remains and the strategy reports at period end.
    pub fn on_reporting_period_end(&mut self) -> Option<u64> {
        let eligible = self.strategy.on_reporting_period_end();
        if eligible && self.due() {
            self.last_reported_time = self.last_recorded_time;
            Some(self.last_reported_time)
        } else {
            None
        }
    }

    /// Unreported activity exists.
    fn due(&self) -> bool {
        self.last_recorded_time > self.last_reported_time
    }
}

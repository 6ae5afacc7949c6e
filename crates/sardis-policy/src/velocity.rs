//! Transaction velocity limiting: sliding windows per agent over the last
//! minute, hour, and day.

use std::collections::VecDeque;

use dashmap::DashMap;

use sardis_types::{AgentId, RejectReason, UnixSeconds};

/// Maximum transaction counts per sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VelocityLimits {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl Default for VelocityLimits {
    fn default() -> Self {
        Self { per_minute: 10, per_hour: 100, per_day: 500 }
    }
}

/// Sliding-window velocity limiter. `check` is read-only; `record` appends
/// a timestamp after the transaction is accepted.
pub struct VelocityLimiter {
    limits: VelocityLimits,
    history: DashMap<AgentId, VecDeque<UnixSeconds>>,
}

impl VelocityLimiter {
    pub fn new(limits: VelocityLimits) -> Self {
        Self { limits, history: DashMap::new() }
    }

    /// Check whether another transaction is allowed right now.
    pub fn check(&self, agent_id: &AgentId, now: UnixSeconds) -> Result<(), RejectReason> {
        let Some(mut timestamps) = self.history.get_mut(agent_id) else {
            return Ok(());
        };
        // Purge anything older than the widest window while we hold the entry.
        let day_floor = now.saturating_sub(86_400);
        while timestamps.front().is_some_and(|t| *t < day_floor) {
            timestamps.pop_front();
        }

        let minute_floor = now.saturating_sub(60);
        let hour_floor = now.saturating_sub(3_600);

        let mut in_minute = 0u32;
        let mut in_hour = 0u32;
        let in_day = timestamps.len() as u32;
        for t in timestamps.iter().rev() {
            if *t >= hour_floor {
                in_hour += 1;
                if *t >= minute_floor {
                    in_minute += 1;
                }
            } else {
                break;
            }
        }

        if in_minute >= self.limits.per_minute {
            return Err(RejectReason::VelocityLimitMinute);
        }
        if in_hour >= self.limits.per_hour {
            return Err(RejectReason::VelocityLimitHour);
        }
        if in_day >= self.limits.per_day {
            return Err(RejectReason::VelocityLimitDay);
        }
        Ok(())
    }

    /// Record an accepted transaction.
    pub fn record(&self, agent_id: &AgentId, now: UnixSeconds) {
        self.history.entry(agent_id.clone()).or_default().push_back(now);
    }

    /// Drop day-old entries for all agents. Returns the number removed.
    pub fn purge_stale(&self, now: UnixSeconds) -> usize {
        let floor = now.saturating_sub(86_400);
        let mut removed = 0;
        for mut entry in self.history.iter_mut() {
            while entry.front().is_some_and(|t| *t < floor) {
                entry.pop_front();
                removed += 1;
            }
        }
        self.history.retain(|_, timestamps| !timestamps.is_empty());
        removed
    }
}

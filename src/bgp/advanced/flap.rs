//! Route flap damping (RFC 2439, spec §4.6): per-prefix exponential-decay
//! penalty, suppress/reuse thresholds, hard cap on suppression duration.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::wire::bgp_attributes::Prefix;

#[derive(Debug, Clone, Copy)]
pub struct DampingConfig {
    pub half_life_secs: i64,
    pub suppress_threshold: f64,
    pub reuse_threshold: f64,
    pub max_suppress_secs: i64,
    /// Below this decayed penalty, with no active suppression, the tracking
    /// entry is retired entirely rather than kept around decaying towards
    /// zero forever (bounds memory under long-running route churn).
    pub cutoff_threshold: f64,
}

impl Default for DampingConfig {
    fn default() -> Self {
        DampingConfig {
            half_life_secs: 900,
            suppress_threshold: 3000.0,
            reuse_threshold: 750.0,
            max_suppress_secs: 3600,
            cutoff_threshold: 1000.0,
        }
    }
}

pub const WITHDRAWAL_PENALTY: f64 = 1000.0;
pub const ATTRIBUTE_CHANGE_PENALTY: f64 = 500.0;

#[derive(Debug, Clone)]
struct PrefixPenalty {
    penalty: f64,
    last_update: DateTime<Utc>,
    suppressed_since: Option<DateTime<Utc>>,
}

/// Tracks accumulated flap penalty per prefix, for eBGP-learned routes only
/// by default (spec §4.6).
#[derive(Debug, Default)]
pub struct FlapDampener {
    config: DampingConfig,
    state: HashMap<Prefix, PrefixPenalty>,
}

impl FlapDampener {
    pub fn new(config: DampingConfig) -> Self {
        FlapDampener { config, state: HashMap::new() }
    }

    fn decay(&self, entry: &PrefixPenalty, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - entry.last_update).num_milliseconds().max(0) as f64 / 1000.0;
        let half_lives = elapsed / self.config.half_life_secs as f64;
        entry.penalty * 0.5f64.powf(half_lives)
    }

    /// Record a withdrawal or attribute-change event at `now`, and return
    /// whether the prefix is suppressed afterwards.
    pub fn record_event(&mut self, prefix: Prefix, penalty_delta: f64, now: DateTime<Utc>) -> bool {
        let entry = self.state.entry(prefix).or_insert(PrefixPenalty {
            penalty: 0.0,
            last_update: now,
            suppressed_since: None,
        });
        entry.penalty = self.decay(entry, now) + penalty_delta;
        entry.last_update = now;
        if entry.penalty >= self.config.suppress_threshold && entry.suppressed_since.is_none() {
            entry.suppressed_since = Some(now);
        }
        let suppressed = self.is_suppressed_at(prefix, now);
        self.retire_if_below_cutoff(prefix, now);
        suppressed
    }

    /// Is `prefix` currently suppressed? Applies the reuse threshold and the
    /// hard `max_suppress_secs` cap.
    pub fn is_suppressed_at(&mut self, prefix: Prefix, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.state.get_mut(&prefix) else { return false };
        let Some(since) = entry.suppressed_since else { return false };

        let current_penalty = {
            let elapsed = (now - entry.last_update).num_milliseconds().max(0) as f64 / 1000.0;
            let half_lives = elapsed / self.config.half_life_secs as f64;
            entry.penalty * 0.5f64.powf(half_lives)
        };

        if (now - since).num_seconds() >= self.config.max_suppress_secs {
            entry.suppressed_since = None;
            entry.penalty = current_penalty.min(self.config.reuse_threshold);
            entry.last_update = now;
            self.retire_if_below_cutoff(prefix, now);
            return false;
        }
        if current_penalty < self.config.reuse_threshold {
            entry.suppressed_since = None;
            entry.penalty = current_penalty;
            entry.last_update = now;
            self.retire_if_below_cutoff(prefix, now);
            return false;
        }
        true
    }

    /// Retire `prefix`'s tracking entry once its decayed penalty falls below
    /// `cutoff_threshold` with no active suppression (spec §4.6; grounded in
    /// `wontyoubemyneighbor`'s `_decay_penalty()` popping `flap_info`),
    /// bounding memory use under long-running route churn.
    fn retire_if_below_cutoff(&mut self, prefix: Prefix, now: DateTime<Utc>) {
        let Some(entry) = self.state.get(&prefix) else { return };
        if entry.suppressed_since.is_none() && self.decay(entry, now) < self.config.cutoff_threshold {
            self.state.remove(&prefix);
        }
    }

    pub fn penalty_at(&self, prefix: Prefix, now: DateTime<Utc>) -> f64 {
        match self.state.get(&prefix) {
            Some(entry) => self.decay(entry, now),
            None => 0.0,
        }
    }

    /// Per-prefix snapshot for an observability hook: current decayed
    /// penalty and whether it's presently suppressed, as of `now`.
    pub fn statistics_at(&self, prefix: Prefix, now: DateTime<Utc>) -> Option<FlapStatistics> {
        let entry = self.state.get(&prefix)?;
        Some(FlapStatistics {
            prefix,
            penalty: self.decay(entry, now),
            suppressed: entry.suppressed_since.is_some(),
            suppressed_since: entry.suppressed_since,
        })
    }

    /// Snapshot every prefix this dampener has ever seen a flap event for.
    pub fn all_statistics(&self, now: DateTime<Utc>) -> Vec<FlapStatistics> {
        self.state
            .keys()
            .filter_map(|prefix| self.statistics_at(*prefix, now))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlapStatistics {
    pub prefix: Prefix,
    pub penalty: f64,
    pub suppressed: bool,
    pub suppressed_since: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn prefix() -> Prefix {
        Prefix::new("192.0.2.0".parse().unwrap(), 24)
    }

    #[test]
    fn suppresses_after_repeated_withdraws_s5() {
        let config = DampingConfig { half_life_secs: 15, suppress_threshold: 2000.0, reuse_threshold: 750.0, max_suppress_secs: 3600, cutoff_threshold: 1000.0 };
        let mut d = FlapDampener::new(config);
        let t0 = Utc::now();
        assert!(!d.record_event(prefix(), WITHDRAWAL_PENALTY, t0));
        assert!(!d.record_event(prefix(), WITHDRAWAL_PENALTY, t0 + Duration::seconds(1)));
        assert!(d.record_event(prefix(), WITHDRAWAL_PENALTY, t0 + Duration::seconds(2)));
    }

    #[test]
    fn reuse_after_decay_below_threshold() {
        let config = DampingConfig { half_life_secs: 15, suppress_threshold: 2000.0, reuse_threshold: 750.0, max_suppress_secs: 3600, cutoff_threshold: 1000.0 };
        let mut d = FlapDampener::new(config);
        let t0 = Utc::now();
        d.record_event(prefix(), WITHDRAWAL_PENALTY, t0);
        d.record_event(prefix(), WITHDRAWAL_PENALTY, t0 + Duration::seconds(1));
        assert!(d.record_event(prefix(), WITHDRAWAL_PENALTY, t0 + Duration::seconds(2)));
        // Well past several half-lives: penalty should have decayed below reuse threshold.
        let later = t0 + Duration::seconds(200);
        assert!(!d.is_suppressed_at(prefix(), later));
    }

    #[test]
    fn hard_cap_unsuppresses_regardless() {
        let config = DampingConfig { half_life_secs: 100_000, suppress_threshold: 100.0, reuse_threshold: 50.0, max_suppress_secs: 10, cutoff_threshold: 1000.0 };
        let mut d = FlapDampener::new(config);
        let t0 = Utc::now();
        assert!(d.record_event(prefix(), 1000.0, t0));
        assert!(!d.is_suppressed_at(prefix(), t0 + Duration::seconds(11)));
    }

    #[test]
    fn statistics_reflect_current_suppression() {
        let config = DampingConfig { half_life_secs: 15, suppress_threshold: 2000.0, reuse_threshold: 750.0, max_suppress_secs: 3600, cutoff_threshold: 1000.0 };
        let mut d = FlapDampener::new(config);
        let t0 = Utc::now();
        assert!(d.statistics_at(prefix(), t0).is_none());
        d.record_event(prefix(), WITHDRAWAL_PENALTY, t0);
        d.record_event(prefix(), WITHDRAWAL_PENALTY, t0 + Duration::seconds(1));
        d.record_event(prefix(), WITHDRAWAL_PENALTY, t0 + Duration::seconds(2));
        let stats = d.statistics_at(prefix(), t0 + Duration::seconds(2)).unwrap();
        assert!(stats.suppressed);
        assert!(stats.penalty >= 2000.0);
        assert_eq!(d.all_statistics(t0 + Duration::seconds(2)).len(), 1);
    }

    #[test]
    fn retires_entry_once_decayed_penalty_falls_below_cutoff() {
        let config = DampingConfig { half_life_secs: 15, suppress_threshold: 5000.0, reuse_threshold: 750.0, max_suppress_secs: 3600, cutoff_threshold: 400.0 };
        let mut d = FlapDampener::new(config);
        let t0 = Utc::now();
        d.record_event(prefix(), ATTRIBUTE_CHANGE_PENALTY, t0);
        assert!(d.statistics_at(prefix(), t0).is_some());

        // Well past several half-lives, with no further events: the decayed
        // penalty falls below the cutoff threshold and the entry is retired
        // rather than kept around decaying towards zero forever.
        let later = t0 + Duration::seconds(200);
        d.record_event(prefix(), 0.0, later);
        assert!(d.statistics_at(prefix(), later).is_none());
    }
}

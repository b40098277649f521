//! Per-fingerprint penalty store with time decay.
//!
//! Single `Mutex<HashMap<...>>`, mirroring the reference kernel's
//! `Arc<Mutex<Stats>>` discipline in `main.rs`: lock, read-modify-write, drop.
//! `now` is threaded in by the caller as seconds-since-epoch (`f64`) rather
//! than read from the system clock inside the store, so decay is
//! deterministic and testable without a real clock.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::fingerprint::Fingerprint;

/// Decayed score drops below this on any access and the record is evicted;
/// invisible to the contract since such a score is already below any
/// realistic threshold.
const EVICTION_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
pub struct PenaltyRecord {
    pub score: f64,
    pub last_update: f64,
    pub token_cost_accumulated: u64,
}

pub struct PenaltyStore {
    records: Mutex<HashMap<Fingerprint, PenaltyRecord>>,
    half_life_seconds: f64,
    threshold: f64,
}

impl PenaltyStore {
    pub fn new(half_life_seconds: f64, threshold: f64) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            half_life_seconds,
            threshold,
        }
    }

    fn decay_constant(&self) -> f64 {
        // tau such that score halves every half_life_seconds: exp(-t/tau) = 0.5 at t = half_life.
        self.half_life_seconds / std::f64::consts::LN_2
    }

    fn decayed_score(&self, record: &PenaltyRecord, now: f64) -> f64 {
        let elapsed = (now - record.last_update).max(0.0);
        record.score * (-elapsed / self.decay_constant()).exp()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, PenaltyRecord>> {
        // A poisoned mutex (panicking holder) must not crash the pipeline.
        // A lost offense is preferred to a denied request.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current decayed score; 0.0 if no record exists.
    pub fn penalty(&self, fp: &Fingerprint, now: f64) -> f64 {
        let guard = self.lock();
        match guard.get(fp) {
            Some(record) => self.decayed_score(record, now),
            None => 0.0,
        }
    }

    /// Record an offense, decaying the prior score forward to `now` first.
    /// Weights: signature block = 3.0, WEIRD entropy = 2.0, HIGH attack
    /// probability = 1.0, judge-invalid = 1.5.
    pub fn record_offense(&self, fp: &Fingerprint, weight: f64, now: f64) {
        let mut guard = self.lock();
        let new_score = match guard.get(fp) {
            Some(record) => self.decayed_score(record, now) + weight,
            None => weight,
        };
        guard.insert(
            fp.clone(),
            PenaltyRecord {
                score: new_score,
                last_update: now,
                token_cost_accumulated: guard.get(fp).map(|r| r.token_cost_accumulated).unwrap_or(0),
            },
        );
        Self::evict_decayed(&mut guard, now, self.decay_constant());
    }

    /// Accumulate upstream token usage for observability; never touches `score`.
    pub fn record_token_cost(&self, fp: &Fingerprint, tokens: u64, now: f64) {
        let mut guard = self.lock();
        guard
            .entry(fp.clone())
            .and_modify(|r| r.token_cost_accumulated += tokens)
            .or_insert(PenaltyRecord {
                score: 0.0,
                last_update: now,
                token_cost_accumulated: tokens,
            });
    }

    /// `penalty(fp, now) >= threshold`.
    pub fn is_penalised(&self, fp: &Fingerprint, now: f64) -> bool {
        self.penalty(fp, now) >= self.threshold
    }

    fn evict_decayed(
        guard: &mut HashMap<Fingerprint, PenaltyRecord>,
        now: f64,
        decay_constant: f64,
    ) {
        guard.retain(|_, record| {
            let elapsed = (now - record.last_update).max(0.0);
            let decayed = record.score * (-elapsed / decay_constant).exp();
            decayed >= EVICTION_EPSILON || record.token_cost_accumulated > 0
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        crate::fingerprint::fingerprint(&crate::fingerprint::CallerIdentity {
            user_id: Some(s.to_string()),
            peer_addr: "127.0.0.1".to_string(),
        })
    }

    #[test]
    fn no_record_is_zero() {
        let store = PenaltyStore::new(600.0, 2.5);
        assert_eq!(store.penalty(&fp("a"), 0.0), 0.0);
        assert!(!store.is_penalised(&fp("a"), 0.0));
    }

    #[test]
    fn offense_increases_score_monotonically() {
        let store = PenaltyStore::new(600.0, 2.5);
        let f = fp("a");
        let before = store.penalty(&f, 0.0);
        store.record_offense(&f, 3.0, 0.0);
        let after = store.penalty(&f, 0.0);
        assert!(after >= before + 3.0 - 1e-9);
    }

    #[test]
    fn decay_halves_score_per_half_life() {
        let store = PenaltyStore::new(600.0, 2.5);
        let f = fp("a");
        store.record_offense(&f, 4.0, 0.0);
        let decayed = store.penalty(&f, 600.0);
        assert!((decayed - 2.0).abs() < 1e-6, "got {decayed}");
        let decayed_twice = store.penalty(&f, 1200.0);
        assert!((decayed_twice - 1.0).abs() < 1e-6, "got {decayed_twice}");
    }

    #[test]
    fn penalty_box_triggers_at_threshold() {
        let store = PenaltyStore::new(600.0, 2.5);
        let f = fp("a");
        store.record_offense(&f, 2.0, 0.0);
        assert!(!store.is_penalised(&f, 0.0));
        store.record_offense(&f, 2.0, 0.0);
        assert!(store.is_penalised(&f, 0.0));
    }

    #[test]
    fn token_cost_does_not_change_score() {
        let store = PenaltyStore::new(600.0, 2.5);
        let f = fp("a");
        store.record_offense(&f, 3.0, 0.0);
        let before = store.penalty(&f, 0.0);
        store.record_token_cost(&f, 500, 0.0);
        let after = store.penalty(&f, 0.0);
        assert_eq!(before, after);
    }

    #[test]
    fn three_offenses_then_allow_still_penalised() {
        // Scenario S6: submit an offense-triggering request three times, then a clean one.
        let store = PenaltyStore::new(600.0, 2.5);
        let f = fp("victim");
        store.record_offense(&f, 2.0, 0.0);
        store.record_offense(&f, 2.0, 1.0);
        store.record_offense(&f, 2.0, 2.0);
        assert!(store.is_penalised(&f, 3.0));
    }
}

//! Shannon-entropy scoring of the target user message.
//!
//! A pure, stateless free function: no struct, no hidden state, compiled
//! thresholds supplied by the caller from `ShieldConfig`.

use std::collections::HashMap;

use crate::model::ThreatLevel;

/// `H = -Σ p_i · log2(p_i)` over the Unicode-scalar-value frequency
/// distribution of `text`. Empty string yields `H = 0`.
pub fn shannon_entropy(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<char, u64> = HashMap::new();
    let mut total = 0u64;
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }

    let total = total as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Classify a pre-computed entropy score against the configured thresholds.
pub fn classify(entropy: f64, clean_max: f64, weird_min: f64) -> ThreatLevel {
    if entropy <= clean_max {
        ThreatLevel::Clean
    } else if entropy <= weird_min {
        ThreatLevel::Suspicious
    } else {
        ThreatLevel::Weird
    }
}

//! Conflict detection and resolution suggestion
//!
//! Classifies a (local, remote) value pair and suggests a strategy from the
//! registry. The heuristics bias toward the common non-destructive case and
//! flag genuinely ambiguous divergences for manual review.

use grid_common::{Conflict, ConflictType};
use serde_json::Value;

/// Relative deviation from the mean below which two numbers count as "near"
const NUMERIC_NEAR_THRESHOLD: f64 = 0.1;

/// Minimum string similarity for suggesting a text merge
const TEXT_SIMILARITY_THRESHOLD: f64 = 0.5;

/// A suggested resolution with a confidence score in `0.0..=1.0`
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub strategy_id: String,
    pub confidence: f64,
}

/// Classifies conflicts and suggests resolution strategies
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Classify a divergence by the runtime shape of the two sides
    pub fn detect_type(local: &Value, remote: &Value) -> ConflictType {
        if json_kind(local) != json_kind(remote) {
            return ConflictType::Type;
        }

        match (local, remote) {
            (Value::Object(l), Value::Object(r)) => {
                let mut l_keys: Vec<&String> = l.keys().collect();
                let mut r_keys: Vec<&String> = r.keys().collect();
                l_keys.sort();
                r_keys.sort();
                if l_keys != r_keys {
                    ConflictType::Structural
                } else {
                    ConflictType::Value
                }
            }
            (Value::Array(l), Value::Array(r)) if l.len() != r.len() => {
                ConflictType::Structural
            }
            _ => ConflictType::Value,
        }
    }

    /// Suggest a resolution strategy for a conflict.
    ///
    /// Heuristic order: type mismatches go to manual review; numerically
    /// near values average; similar text concatenates; everything else
    /// falls back to last-write-wins.
    pub fn suggest_resolution(&self, conflict: &Conflict) -> Suggestion {
        if conflict.conflict_type == ConflictType::Type {
            return Suggestion {
                strategy_id: "manual".to_string(),
                confidence: 0.3,
            };
        }

        if let (Some(local), Some(remote)) = (
            conflict.local_value.as_f64(),
            conflict.remote_value.as_f64(),
        ) {
            let mean = (local + remote) / 2.0;
            if mean != 0.0 {
                // deviation of either side from the mean, relative to the mean
                let deviation = ((local - remote) / 2.0).abs() / mean.abs();
                if deviation < NUMERIC_NEAR_THRESHOLD {
                    return Suggestion {
                        strategy_id: "merge_numeric".to_string(),
                        confidence: 0.8,
                    };
                }
            } else if local == remote {
                return Suggestion {
                    strategy_id: "merge_numeric".to_string(),
                    confidence: 0.8,
                };
            }
        }

        if let (Some(local), Some(remote)) = (
            conflict.local_value.as_str(),
            conflict.remote_value.as_str(),
        ) {
            let similarity = similarity(local, remote);
            if similarity > TEXT_SIMILARITY_THRESHOLD {
                return Suggestion {
                    strategy_id: "merge_string".to_string(),
                    confidence: similarity,
                };
            }
        }

        Suggestion {
            strategy_id: "last_write_wins".to_string(),
            confidence: 0.6,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `1 - editDistance(a, b) / max_len`, in `0.0..=1.0`
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - edit_distance(a, b) as f64 / max_len as f64
}

/// Levenshtein distance, standard O(n·m) dynamic programming with a rolling
/// row.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

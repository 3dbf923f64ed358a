//! Structural quality scoring and ending detection.
//!
//! Pure functions over the turn sequence: no clock, no I/O, identical
//! inputs always yield identical outputs.

use co_core::types::Turn;
use config::ConversationConfig;
use std::collections::HashSet;

/// How many of the most recent turns the repetition check compares.
const REPETITION_WINDOW: usize = 4;

/// Turns shorter than this many words are too small to call repetitive.
const MIN_COMPARABLE_WORDS: usize = 5;

/// Latency band the score treats as healthy, in milliseconds.
const IDEAL_LATENCY_MS: f64 = 500.0;

/// Content length the score treats as substantive, in characters.
const SUBSTANTIVE_CONTENT_CHARS: f64 = 200.0;

const CLOSING_PHRASES: [&str; 6] = [
    "in conclusion",
    "to summarize",
    "overall",
    "in summary",
    "that concludes",
    "final thoughts",
];

pub struct QualityAssessor {
    similarity_threshold: f64,
    ideal_turns_min: u32,
    ideal_turns_max: u32,
}

impl QualityAssessor {
    #[must_use]
    pub fn new(config: &ConversationConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            ideal_turns_min: config.ideal_turns_min,
            ideal_turns_max: config.ideal_turns_max,
        }
    }

    /// Structural quality score in `[0, 1]`.
    ///
    /// Weighted sum: turn-count proximity to the ideal band (0.3),
    /// provider diversity (0.2), average latency proximity to the
    /// healthy band (0.2), average content length (0.2), and a bonus
    /// for avoiding repetition (0.1).
    #[must_use]
    pub fn score(&self, turns: &[Turn]) -> f64 {
        if turns.is_empty() {
            return 0.0;
        }

        let mut score = 0.0;
        let count = turns.len() as f64;

        let ideal = f64::from(self.ideal_turns_min + self.ideal_turns_max) / 2.0;
        let length_factor = 1.0 - (count - ideal).abs() / ideal;
        score += length_factor.max(0.0) * 0.3;

        let distinct: HashSet<&str> = turns.iter().map(|t| t.provider.as_str()).collect();
        let diversity_factor = (distinct.len() as f64 / 2.0).min(1.0);
        score += diversity_factor * 0.2;

        let avg_latency =
            turns.iter().map(|t| t.latency_ms as f64).sum::<f64>() / count;
        let latency_factor = 1.0 - (avg_latency - IDEAL_LATENCY_MS).abs() / 1_000.0;
        score += latency_factor.max(0.0) * 0.2;

        let avg_length =
            turns.iter().map(|t| t.content.len() as f64).sum::<f64>() / count;
        let content_factor = (avg_length / SUBSTANTIVE_CONTENT_CHARS).min(1.0);
        score += content_factor * 0.2;

        if !self.detect_repetition(turns) {
            score += 0.1;
        }

        score.min(1.0)
    }

    /// Whether the conversation has reached a natural end: recent turns
    /// repeating each other, or closing language in the latest turn.
    #[must_use]
    pub fn natural_end(&self, turns: &[Turn]) -> bool {
        if turns.is_empty() {
            return false;
        }
        self.detect_repetition(turns) || Self::has_closing_language(&turns[turns.len() - 1])
    }

    /// Pairwise Jaccard word-overlap over the most recent turns.
    #[must_use]
    pub fn detect_repetition(&self, turns: &[Turn]) -> bool {
        if turns.len() < 2 {
            return false;
        }
        let window_start = turns.len().saturating_sub(REPETITION_WINDOW);
        let recent = &turns[window_start..];

        let word_sets: Vec<HashSet<String>> = recent
            .iter()
            .map(|turn| {
                turn.content
                    .to_lowercase()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect()
            })
            .collect();

        for (i, a) in word_sets.iter().enumerate() {
            for b in word_sets.iter().skip(i + 1) {
                if a.len() < MIN_COMPARABLE_WORDS || b.len() < MIN_COMPARABLE_WORDS {
                    continue;
                }
                let intersection = a.intersection(b).count() as f64;
                let union = a.union(b).count() as f64;
                if intersection / union > self.similarity_threshold {
                    return true;
                }
            }
        }
        false
    }

    fn has_closing_language(turn: &Turn) -> bool {
        let content = turn.content.to_lowercase();
        CLOSING_PHRASES.iter().any(|phrase| content.contains(phrase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessor() -> QualityAssessor {
        QualityAssessor::new(&ConversationConfig::default())
    }

    fn turn(sequence: u32, provider: &str, content: &str) -> Turn {
        Turn {
            sequence,
            provider: provider.to_string(),
            content: content.to_string(),
            token_count: 50,
            latency_ms: 500,
            timestamp: i64::from(sequence),
        }
    }

    const DISTINCT_CONTENTS: [&str; 8] = [
        "Distributed consensus requires careful quorum tuning across geographically spread \
         replicas before commit latency becomes acceptable for interactive workloads.",
        "Cache prefetching policies trade memory headroom against miss penalties, and the \
         right aggressiveness depends heavily on access pattern stability.",
        "Ownership and borrowing eliminate entire categories of temporal safety bugs without \
         imposing garbage collection pauses on throughput sensitive paths.",
        "Fair scheduling degrades sharply once run queues grow unbounded, because wakeup \
         storms amplify head of line blocking under contention.",
        "Telemetry pipelines should aggregate traces, counters, and structured records close \
         to the producer to keep cardinality explosions contained early.",
        "Backpressure works best when demand signals propagate upstream promptly, letting \
         producers shed or defer work instead of buffering indefinitely.",
        "Idempotent consumers make at least once delivery tolerable, since replays collapse \
         into no-ops keyed by a stable deduplication identifier.",
        "Optimistic versioning favors readers and punishes conflicting writers, which suits \
         stores where contention clusters on a small fraction of keys.",
    ];

    fn varied_turns(n: u32) -> Vec<Turn> {
        (1..=n)
            .map(|i| {
                let provider = if i % 2 == 1 { "anthropic" } else { "google" };
                turn(i, provider, DISTINCT_CONTENTS[(i as usize - 1) % 8])
            })
            .collect()
    }

    #[test]
    fn empty_turns_score_zero() {
        assert_eq!(assessor().score(&[]), 0.0);
        assert!(!assessor().natural_end(&[]));
    }

    #[test]
    fn score_is_deterministic() {
        let turns = varied_turns(6);
        let a = assessor().score(&turns);
        let b = assessor().score(&turns);
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a));
    }

    #[test]
    fn ideal_band_with_diverse_providers_scores_high() {
        let turns = varied_turns(6);
        let score = assessor().score(&turns);
        assert!(score > 0.8, "expected high score, got {score}");
    }

    #[test]
    fn degenerate_conversation_scores_low() {
        // One provider, one short turn, far from the ideal band.
        let turns = vec![turn(1, "anthropic", "short")];
        let score = assessor().score(&turns);
        assert!(score < 0.5, "expected low score, got {score}");
    }

    #[test]
    fn repetition_trips_the_natural_end() {
        let mut turns = varied_turns(6);
        // Turn 6 becomes a near-duplicate of turn 5.
        turns[5].content = turns[4].content.clone();

        let assessor = assessor();
        assert!(assessor.detect_repetition(&turns));
        assert!(assessor.natural_end(&turns));
    }

    #[test]
    fn closing_language_trips_the_natural_end() {
        let mut turns = varied_turns(5);
        turns.push(turn(
            6,
            "google",
            "In conclusion, we have thoroughly explored the tradeoffs discussed above.",
        ));
        let assessor = assessor();
        assert!(!assessor.detect_repetition(&turns));
        assert!(assessor.natural_end(&turns));
    }

    #[test]
    fn distinct_content_does_not_end_naturally() {
        let turns = varied_turns(8);
        assert!(!assessor().natural_end(&turns));
    }

    #[test]
    fn repetition_outside_the_window_is_ignored() {
        let mut turns = varied_turns(8);
        // Turns 1 and 2 identical, but the window only covers 5..=8.
        turns[1].content = turns[0].content.clone();
        assert!(!assessor().detect_repetition(&turns));
    }

    #[test]
    fn tiny_turns_are_not_compared() {
        let turns = vec![
            turn(1, "anthropic", "yes indeed"),
            turn(2, "google", "yes indeed"),
        ];
        assert!(!assessor().detect_repetition(&turns));
    }

    #[test]
    fn ending_check_is_idempotent_on_a_final_turn_list() {
        let mut turns = varied_turns(6);
        turns[5].content = "To summarize our discussion, both sides converged.".to_string();

        let assessor = assessor();
        let first = assessor.natural_end(&turns);
        let second = assessor.natural_end(&turns);
        assert!(first);
        assert_eq!(first, second);
    }
}

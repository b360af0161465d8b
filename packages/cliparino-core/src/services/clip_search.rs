//! Fuzzy clip search: ranks a broadcaster's clips against chat search terms.
//!
//! Scoring is a pure function of `(title, query)` with documented
//! tiebreakers, so results are deterministic for a fixed candidate list.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use crate::state::ClipSearchConfig;
use crate::twitch::helix::HelixResult;
use crate::twitch::traits::ClipLookup;
use crate::twitch::types::Clip;

/// Maximum candidates pulled per search.
const MAX_CANDIDATES: usize = 100;

/// Score for a contiguous substring match.
const SUBSTRING_SCORE: f64 = 100.0;

/// Ceiling for the word-overlap tier.
const WORD_TIER_CEILING: f64 = 80.0;

/// Ceiling for the Levenshtein tier.
const LEVENSHTEIN_TIER_CEILING: f64 = 60.0;

/// Normalizes a title or query: lowercase + trim.
fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Scores a clip title against a query with the three-tier function.
///
/// 1. Contiguous substring of the normalized title -> 100.
/// 2. Word overlap: `(matched words / total words) * 80` when > 0.
/// 3. Normalized Levenshtein similarity `(1 - distance / max_len) * 60`,
///    discarded below `threshold`.
///
/// Returns `None` when no tier produces a usable score.
#[must_use]
pub fn score_title(title: &str, query: &str, threshold: f64) -> Option<f64> {
    let title = normalize(title);
    let query = normalize(query);
    if query.is_empty() || title.is_empty() {
        return None;
    }

    if title.contains(&query) {
        return Some(SUBSTRING_SCORE);
    }

    let words: Vec<&str> = query.split_whitespace().collect();
    if !words.is_empty() {
        let matched = words.iter().filter(|w| title.contains(**w)).count();
        if matched > 0 {
            return Some(matched as f64 / words.len() as f64 * WORD_TIER_CEILING);
        }
    }

    let distance = strsim::levenshtein(&title, &query);
    let max_len = title.chars().count().max(query.chars().count());
    if max_len == 0 {
        return None;
    }
    let similarity = 1.0 - distance as f64 / max_len as f64;
    if similarity < threshold {
        return None;
    }
    Some(similarity * LEVENSHTEIN_TIER_CEILING)
}

/// Picks the best-scoring clip from a candidate list.
///
/// Ties break by higher view count, then by recency.
#[must_use]
pub fn rank_candidates(candidates: Vec<Clip>, query: &str, threshold: f64) -> Option<Clip> {
    let mut scored: Vec<(f64, Clip)> = candidates
        .into_iter()
        .filter_map(|clip| score_title(&clip.title, query, threshold).map(|s| (s, clip)))
        .collect();

    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.view_count.cmp(&a.view_count))
            .then_with(|| b.created_at.cmp(&a.created_at))
    });

    scored.into_iter().next().map(|(_, clip)| clip)
}

/// Clip search service: loads candidates via Helix and ranks them.
pub struct ClipSearch {
    twitch: Arc<dyn ClipLookup>,
    config: ClipSearchConfig,
}

impl ClipSearch {
    /// Creates a search service.
    #[must_use]
    pub fn new(twitch: Arc<dyn ClipLookup>, config: ClipSearchConfig) -> Self {
        Self { twitch, config }
    }

    /// Finds the best clip for the broadcaster matching the search terms.
    pub async fn find_best(&self, broadcaster_id: &str, terms: &str) -> HelixResult<Option<Clip>> {
        let window_start = Utc::now() - ChronoDuration::days(self.config.search_window_days);
        let candidates = self
            .twitch
            .clips_for_broadcaster(broadcaster_id, Some(window_start), MAX_CANDIDATES)
            .await?;
        log::debug!(
            "[Search] {} candidates for '{}' (window {} days)",
            candidates.len(),
            terms,
            self.config.search_window_days
        );
        Ok(rank_candidates(
            candidates,
            terms,
            self.config.fuzzy_match_threshold,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twitch::types::test_fixtures::clip;
    use chrono::TimeZone;

    const THRESHOLD: f64 = 0.4;

    #[test]
    fn substring_match_scores_full_marks() {
        assert_eq!(
            score_title("Insane Headshot Montage!!", "headshot montage", THRESHOLD),
            Some(100.0)
        );
        // Case-insensitive, trimmed.
        assert_eq!(
            score_title("HEADSHOT montage", "  Headshot Montage ", THRESHOLD),
            Some(100.0)
        );
    }

    #[test]
    fn word_tier_scores_proportionally() {
        // "headshot" matches, "fails" doesn't: 1/2 * 80 = 40.
        assert_eq!(
            score_title("Insane Headshot Montage", "headshot fails", THRESHOLD),
            Some(40.0)
        );
    }

    #[test]
    fn levenshtein_tier_applies_below_word_overlap() {
        // No shared word, but close in edit distance.
        let score = score_title("headshots", "headshot", THRESHOLD);
        // "headshot" is a substring of "headshots", so tier 1 catches it;
        // use genuinely disjoint strings for the fuzzy tier.
        assert_eq!(score, Some(100.0));

        let fuzzy = score_title("hedshot", "headshot", THRESHOLD).unwrap();
        assert!(fuzzy > 0.0 && fuzzy <= 60.0, "fuzzy score {fuzzy}");
    }

    #[test]
    fn dissimilar_titles_are_discarded() {
        assert_eq!(
            score_title("cooking stream pog", "zzzzqqqq", THRESHOLD),
            None
        );
        assert_eq!(score_title("", "query", THRESHOLD), None);
        assert_eq!(score_title("title", "", THRESHOLD), None);
    }

    #[test]
    fn ranking_prefers_higher_score() {
        let mut exact = clip("exact", "Headshot Montage", 20.0);
        exact.view_count = 1;
        let mut partial = clip("partial", "Headshot fails compilation", 20.0);
        partial.view_count = 10_000;

        let best = rank_candidates(vec![partial, exact], "headshot montage", THRESHOLD).unwrap();
        assert_eq!(best.id, "exact");
    }

    #[test]
    fn ties_break_by_view_count_then_recency() {
        let at = |y: i32| Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0).unwrap();

        let mut a = clip("views", "Headshot Montage", 20.0);
        a.view_count = 500;
        a.created_at = at(2020);
        let mut b = clip("fewer-views", "Headshot Montage", 20.0);
        b.view_count = 100;
        b.created_at = at(2024);
        assert_eq!(
            rank_candidates(vec![b.clone(), a.clone()], "headshot montage", THRESHOLD)
                .unwrap()
                .id,
            "views"
        );

        // Equal views: newer wins.
        let mut c = clip("newer", "Headshot Montage", 20.0);
        c.view_count = 500;
        c.created_at = at(2024);
        assert_eq!(
            rank_candidates(vec![a, c], "headshot montage", THRESHOLD)
                .unwrap()
                .id,
            "newer"
        );
    }

    #[test]
    fn ranking_is_deterministic() {
        let candidates = || {
            vec![
                clip("a", "Headshot Montage", 20.0),
                clip("b", "headshot", 15.0),
                clip("c", "Cooking time", 30.0),
            ]
        };
        let first = rank_candidates(candidates(), "headshot montage", THRESHOLD).unwrap();
        for _ in 0..10 {
            assert_eq!(
                rank_candidates(candidates(), "headshot montage", THRESHOLD)
                    .unwrap()
                    .id,
                first.id
            );
        }
    }
}

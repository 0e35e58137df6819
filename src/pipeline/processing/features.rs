//! Pure feature derivation over a single track.

use crate::types::MoodCategory;

/// Keyword sets in declaration order; earlier entries win ties.
const MOOD_KEYWORDS: [(MoodCategory, &[&str]); 5] = [
    (
        MoodCategory::Happy,
        &["love", "happy", "sun", "dance", "party", "summer", "good", "beautiful", "smile"],
    ),
    (
        MoodCategory::Sad,
        &["sad", "rain", "lonely", "cry", "broken", "heart", "tears", "miss", "pain"],
    ),
    (
        MoodCategory::Energetic,
        &["fire", "energy", "power", "strong", "fight", "wild", "crazy", "burn"],
    ),
    (
        MoodCategory::Calm,
        &["calm", "peace", "quiet", "soft", "gentle", "easy", "slow", "dream"],
    ),
    (
        MoodCategory::Romantic,
        &["love", "heart", "kiss", "baby", "darling", "sweet", "night", "moon"],
    ),
];

/// Keyword-count classification of a track. Total: every input maps to one of
/// the six categories, `Neutral` when no keyword occurs.
pub fn mood_category(track_name: &str, artist_name: &str) -> MoodCategory {
    let text = format!("{} {}", track_name, artist_name).to_lowercase();
    let mut best = (MoodCategory::Neutral, 0usize);
    for (mood, keywords) in MOOD_KEYWORDS.iter() {
        let score = keywords.iter().filter(|k| text.contains(*k)).count();
        // strict comparison keeps the earlier category on ties
        if score > best.1 {
            best = (*mood, score);
        }
    }
    best.0
}

/// Listener reach capped at 1.0 plus an engagement bonus capped at 0.2,
/// rounded to three decimals. Always within `[0, 1.2]`.
pub fn popularity_score(listeners: i64, playcount: i64) -> f64 {
    if listeners <= 0 {
        return 0.0;
    }
    let base = (listeners as f64 / 10_000.0).min(1.0);
    let engagement = playcount as f64 / listeners.max(1) as f64;
    let bonus = (engagement * 0.1).clamp(0.0, 0.2);
    ((base + bonus) * 1_000.0).round() / 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_listeners_score_zero() {
        for playcount in [0, 1, 10_000, i64::MAX] {
            assert_eq!(popularity_score(0, playcount), 0.0);
        }
    }

    #[test]
    fn full_reach_with_capped_bonus() {
        assert_eq!(popularity_score(10_000, 10_000), 1.1);
        assert_eq!(popularity_score(1_000_000, 50_000_000), 1.2);
    }

    #[test]
    fn partial_reach_rounds_to_three_decimals() {
        // base 0.1234, engagement 2 -> bonus 0.2 (capped)
        assert_eq!(popularity_score(1_234, 2_468), 0.323);
        // base 0.5, engagement 0.5 -> bonus 0.05
        assert_eq!(popularity_score(5_000, 2_500), 0.55);
    }

    #[test]
    fn negative_inputs_stay_in_range() {
        assert_eq!(popularity_score(-10, 100), 0.0);
        assert_eq!(popularity_score(5_000, -100), 0.5);
    }

    #[test]
    fn no_keywords_is_neutral() {
        assert_eq!(mood_category("Tití Me Preguntó", "Bad Bunny"), MoodCategory::Neutral);
        assert_eq!(mood_category("", ""), MoodCategory::Neutral);
    }

    #[test]
    fn highest_score_wins() {
        // sad: rain, tears, pain vs romantic: none
        assert_eq!(mood_category("Rain and Tears", "Pain"), MoodCategory::Sad);
        assert_eq!(mood_category("Wild Fire", "Power Crew"), MoodCategory::Energetic);
        assert_eq!(mood_category("Moon Kiss", "Baby Sweet"), MoodCategory::Romantic);
    }

    #[test]
    fn ties_follow_declaration_order() {
        // "love" counts for happy and romantic; happy is declared first
        assert_eq!(mood_category("Love", "X"), MoodCategory::Happy);
        // "heart" counts for sad and romantic; sad is declared first
        assert_eq!(mood_category("Heart", "X"), MoodCategory::Sad);
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        assert_eq!(mood_category("SUNFLOWER", "Post Malone"), MoodCategory::Happy);
        assert_eq!(mood_category("x", "Dreamers"), MoodCategory::Calm);
    }
}

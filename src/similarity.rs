// 🔤 Description similarity
//
// Three tiers, first applicable wins:
//   1. containment  → length ratio (boosted when the shared text is long enough)
//   2. shared words → word Jaccard (boosted for short, keyword-like descriptions)
//   3. otherwise    → character-set Jaccard

use std::collections::HashSet;

use crate::normalize::strip_boilerplate;

/// Minimum shared length (chars) for the containment boost
const CONTAINMENT_BOOST_LEN: usize = 8;
const CONTAINMENT_FLOOR: f64 = 0.8;

/// Descriptions with this many significant words or fewer get the word boost
const SHORT_DESCRIPTION_WORDS: usize = 2;
const WORD_FLOOR: f64 = 0.7;

/// Similarity of two raw descriptions in [0, 1].
pub fn description_similarity(a: &str, b: &str) -> f64 {
    normalized_similarity(&strip_boilerplate(a), &strip_boilerplate(b))
}

/// Similarity of two already normalized descriptions.
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let (shorter, longer) = if a.chars().count() <= b.chars().count() { (a, b) } else { (b, a) };
    if longer.contains(shorter) {
        let short_len = shorter.chars().count();
        let ratio = short_len as f64 / longer.chars().count() as f64;
        return if short_len >= CONTAINMENT_BOOST_LEN {
            ratio.max(CONTAINMENT_FLOOR)
        } else {
            ratio
        };
    }

    let words_a = significant_words(a);
    let words_b = significant_words(b);
    let shared = words_a.intersection(&words_b).count();
    if shared > 0 {
        let union = words_a.union(&words_b).count();
        let jaccard = shared as f64 / union as f64;
        return if words_a.len() <= SHORT_DESCRIPTION_WORDS || words_b.len() <= SHORT_DESCRIPTION_WORDS {
            jaccard.max(WORD_FLOOR)
        } else {
            jaccard
        };
    }

    let chars_a: HashSet<char> = a.chars().filter(|c| !c.is_whitespace()).collect();
    let chars_b: HashSet<char> = b.chars().filter(|c| !c.is_whitespace()).collect();
    let union = chars_a.union(&chars_b).count();
    if union == 0 {
        return 0.0;
    }
    chars_a.intersection(&chars_b).count() as f64 / union as f64
}

/// Words longer than two characters
fn significant_words(text: &str) -> HashSet<&str> {
    text.split_whitespace().filter(|w| w.chars().count() > 2).collect()
}

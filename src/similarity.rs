// 🔤 String Similarity - name and address matching for the identity resolver
//
// "Joe's Pizza", "JOES PIZZA LLC", "Joes Pizza" → "joes pizza"
// "123 Main Street, Suite 4" → "123 main st ste 4"
//
// Scores are in [0, 1]: max(token-set Jaccard, Levenshtein ratio).

use std::collections::BTreeSet;

const LEGAL_SUFFIXES: &[&str] = &[
    "inc", "llc", "ltd", "co", "corp", "corporation", "company", "incorporated", "plc", "pllc",
];

const STREET_ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("road", "rd"),
    ("boulevard", "blvd"),
    ("drive", "dr"),
    ("lane", "ln"),
    ("court", "ct"),
    ("place", "pl"),
    ("parkway", "pkwy"),
    ("highway", "hwy"),
    ("square", "sq"),
    ("terrace", "ter"),
    ("suite", "ste"),
    ("apartment", "apt"),
    ("building", "bldg"),
    ("floor", "fl"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
    ("northeast", "ne"),
    ("northwest", "nw"),
    ("southeast", "se"),
    ("southwest", "sw"),
];

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Lowercase, drop apostrophes, turn other punctuation into spaces, collapse
/// whitespace.
fn clean(s: &str) -> Vec<String> {
    let lowered: String = s
        .to_lowercase()
        .chars()
        .filter(|c| *c != '\'' && *c != '’')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    lowered.split_whitespace().map(|w| w.to_string()).collect()
}

/// Normalize a business name: legal suffixes (inc, llc, co...) are removed.
///
/// A name made only of suffix words keeps them, so "Co" stays "co".
pub fn normalize_name(name: &str) -> String {
    let words = clean(name);
    let kept: Vec<&str> = words
        .iter()
        .map(|w| w.as_str())
        .filter(|w| !LEGAL_SUFFIXES.contains(w))
        .collect();

    if kept.is_empty() {
        words.join(" ")
    } else {
        kept.join(" ")
    }
}

/// Normalize an address: street words are abbreviated
pub fn normalize_address(address: &str) -> String {
    clean(address)
        .into_iter()
        .map(|w| {
            STREET_ABBREVIATIONS
                .iter()
                .find(|(long, _)| *long == w)
                .map(|(_, short)| short.to_string())
                .unwrap_or(w)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// METRICS
// ============================================================================

/// Jaccard index over whitespace tokens
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let left: BTreeSet<&str> = a.split_whitespace().collect();
    let right: BTreeSet<&str> = b.split_whitespace().collect();

    if left.is_empty() && right.is_empty() {
        return 1.0;
    }

    let intersection = left.intersection(&right).count() as f64;
    let union = left.union(&right).count() as f64;
    intersection / union
}

/// Levenshtein distance = minimum number of single-character edits
/// (insertions, deletions, substitutions) to change one string into another
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();
    let len1 = s1_chars.len();
    let len2 = s2_chars.len();

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    // Two rolling rows instead of the full matrix
    let mut previous: Vec<usize> = (0..=len2).collect();
    let mut current = vec![0; len2 + 1];

    for i in 1..=len1 {
        current[0] = i;
        for j in 1..=len2 {
            let cost = if s1_chars[i - 1] == s2_chars[j - 1] { 0 } else { 1 };
            current[j] = std::cmp::min(
                std::cmp::min(
                    previous[j] + 1,     // deletion
                    current[j - 1] + 1,  // insertion
                ),
                previous[j - 1] + cost, // substitution
            );
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[len2]
}

/// 1 − distance / max_len
pub fn levenshtein_ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f64 / max_len as f64
}

/// Combined metric on already-normalized strings
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    token_jaccard(a, b).max(levenshtein_ratio(a, b))
}

pub fn name_similarity(a: &str, b: &str) -> f64 {
    similarity(&normalize_name(a), &normalize_name(b))
}

pub fn address_similarity(a: &str, b: &str) -> f64 {
    similarity(&normalize_address(a), &normalize_address(b))
}

// ============================================================================
// TESTS
// ============================================================================

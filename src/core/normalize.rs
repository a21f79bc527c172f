//! Text normalization and fuzzy similarity for municipality names.

use strsim::normalized_levenshtein;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase, strip diacritics, turn punctuation into spaces and collapse
/// whitespace. `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(input: &str) -> String {
    let mut folded = String::with_capacity(input.len());
    // 先轉小寫再展開連字，大寫 ẞ 才會變成 "ss"
    let lowered = input
        .nfd()
        .flat_map(char::to_lowercase)
        .filter(|c| !is_combining_mark(*c));
    for c in lowered {
        match c {
            'œ' => folded.push_str("oe"),
            'æ' => folded.push_str("ae"),
            'ß' => folded.push_str("ss"),
            c if c.is_alphanumeric() => folded.push(c),
            _ => folded.push(' '),
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn ratio(a: &str, b: &str) -> f64 {
    normalized_levenshtein(a, b) * 100.0
}

fn sorted_tokens(s: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens
}

fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a).join(" "), &sorted_tokens(b).join(" "))
}

/// Compares the shared tokens against each side's full token set.
fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta = sorted_tokens(a);
    let tb = sorted_tokens(b);
    let common: Vec<&str> = ta.iter().filter(|t| tb.contains(t)).copied().collect();
    if common.is_empty() {
        return 0.0;
    }
    let only_a: Vec<&str> = ta.iter().filter(|t| !common.contains(t)).copied().collect();
    let only_b: Vec<&str> = tb.iter().filter(|t| !common.contains(t)).copied().collect();

    let common = common.join(" ");
    let with_a = format!("{} {}", common, only_a.join(" ")).trim().to_string();
    let with_b = format!("{} {}", common, only_b.join(" ")).trim().to_string();

    ratio(&common, &with_a)
        .max(ratio(&common, &with_b))
        .max(ratio(&with_a, &with_b))
}

/// Token based similarity between two already normalized names, in `[0, 100]`.
///
/// Only an identical name reaches 100: the token-set component is scaled
/// down so that "saint" does not perfectly match every "saint ..." commune.
pub fn similarity(query: &str, candidate: &str) -> f64 {
    if query.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    if query == candidate {
        return 100.0;
    }
    let score = ratio(query, candidate)
        .max(token_sort_ratio(query, candidate))
        .max(token_set_ratio(query, candidate) * 0.95);
    // 非完全相同時不得為 100
    score.min(99.9)
}

//! String similarity scoring (C6): normalization + edit-distance matching.

use strsim::levenshtein;

/// `1 - distance / max(len_a, len_b)`, after lowercasing and trimming.
/// Returns 1.0 for two empty strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }

    let distance = levenshtein(&a, &b);
    1.0 - (distance as f64 / max_len as f64)
}

/// Strip disambiguation parentheses (`Artist (2)`, `Artist (rapper)`), strip
/// edition suffixes (`(Remastered)`, `(Deluxe Edition)`), lowercase, collapse
/// whitespace. Runs to a fixed point over up to 3 passes, for nested cases
/// like `X (Remastered) (Deluxe)`.
pub fn normalize_title(title: &str) -> String {
    let mut current = title.to_string();
    for _ in 0..3 {
        let next = strip_one_suffix(&current, EDITION_SUFFIXES);
        if next == current {
            break;
        }
        current = next;
    }
    collapse_whitespace(&current.to_lowercase())
}

/// Strip disambiguation suffixes from an artist name (`Artist (2)`,
/// `Artist (rapper)`).
pub fn normalize_artist(artist: &str) -> String {
    let mut current = artist.to_string();
    for _ in 0..3 {
        let next = strip_one_suffix(&current, DISAMBIGUATION_SUFFIXES);
        if next == current {
            break;
        }
        current = next;
    }
    collapse_whitespace(&current.to_lowercase())
}

const EDITION_SUFFIXES: &[&str] = &[
    "remastered",
    "remaster",
    "deluxe edition",
    "deluxe",
    "expanded edition",
    "expanded",
    "anniversary edition",
    "bonus track version",
    "special edition",
];

const DISAMBIGUATION_SUFFIXES: &[&str] = &[];

/// Strip a single trailing `(...)` group if its lowercased contents match one
/// of `known_suffixes`, or if it is purely numeric/disambiguation-shaped
/// (e.g. `(2)`, `(rapper)`) when `known_suffixes` is empty (artist mode).
fn strip_one_suffix(s: &str, known_suffixes: &[&str]) -> String {
    let trimmed = s.trim_end();
    let Some(open) = trimmed.rfind('(') else {
        return s.to_string();
    };
    if !trimmed.ends_with(')') {
        return s.to_string();
    }
    let inner = &trimmed[open + 1..trimmed.len() - 1];
    let inner_lower = inner.trim().to_lowercase();

    let strips = if known_suffixes.is_empty() {
        // Artist disambiguation: numeric suffixes, or short parentheticals
        // that look like a role/disambiguator rather than part of the name.
        inner_lower.chars().all(|c| c.is_ascii_digit()) || inner_lower.split_whitespace().count() <= 2
    } else {
        known_suffixes.contains(&inner_lower.as_str())
    };

    if strips {
        trimmed[..open].trim_end().to_string()
    } else {
        s.to_string()
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `0.6 * sim(normalize_title) + 0.4 * sim(normalize_artist)`. Normalization
/// applies at both query-construction and scoring boundaries (spec §4.6).
pub fn match_score(search_title: &str, search_artist: &str, result_title: &str, result_artist: &str) -> f64 {
    let title_sim = similarity(&normalize_title(search_title), &normalize_title(result_title));
    let artist_sim = similarity(&normalize_artist(search_artist), &normalize_artist(result_artist));
    0.6 * title_sim + 0.4 * artist_sim
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_identical() {
        assert_eq!(similarity("Come Together", "come together"), 1.0);
    }

    #[test]
    fn test_similarity_empty() {
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn test_normalize_title_strips_edition_suffix() {
        assert_eq!(normalize_title("Abbey Road (Remastered)"), "abbey road");
    }

    #[test]
    fn test_normalize_title_nested_suffixes_fixed_point() {
        let once = normalize_title("Abbey Road (Remastered) (Deluxe)");
        let twice = normalize_title(&once);
        assert_eq!(once, twice, "normalize_title must be idempotent after the 3-pass loop");
        assert_eq!(once, "abbey road");
    }

    #[test]
    fn test_normalize_artist_strips_disambiguation() {
        assert_eq!(normalize_artist("Artist (2)"), "artist");
        assert_eq!(normalize_artist("Artist (rapper)"), "artist");
    }

    #[test]
    fn test_match_score_weights() {
        let score = match_score("Come Together", "The Beatles", "Come Together", "The Beatles");
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_match_score_below_no_match_threshold() {
        let score = match_score("Come Together", "The Beatles", "Xyzzy Plugh", "Unrelated Band");
        assert!(score < 0.3);
    }
}

//! City-name normalization: cache keys, validity checks, API-safe cleaning
//! and the ordered fallback variations tried against the provider.
//!
//! Everything here is pure and synchronous. The Unicode handling is
//! deliberately narrow: NFD decomposition with stripping limited to the Latin
//! combining range U+0300–U+036F, and ASCII word-class edge trimming. A pure
//! Cyrillic name therefore normalizes to `""` while still passing
//! [`is_valid`] through its own script range.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Character-class body covering the accepted letter scripts: Latin (ASCII,
/// Latin-1 supplement, Extended-A/B), Cyrillic, Hebrew, Arabic + supplement,
/// kana and CJK ideographs. Kept as one reviewable artifact; each range has
/// its own test below.
const LETTER_RANGES: &str = "A-Za-z\
\u{00C0}-\u{024F}\
\u{0400}-\u{04FF}\
\u{0590}-\u{05FF}\
\u{0600}-\u{06FF}\
\u{0750}-\u{077F}\
\u{3040}-\u{30FF}\
\u{4E00}-\u{9FFF}";

static HAS_LETTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("[{LETTER_RANGES}]")).expect("valid letter pattern"));

static BAD_EDGE_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^[^{LETTER_RANGES}0-9()]")).expect("valid edge pattern")
});

static BAD_EDGE_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("[^{LETTER_RANGES}0-9()]$")).expect("valid edge pattern")
});

static DOT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{3,}").expect("valid pattern"));
static PUNCT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,;]{2,}").expect("valid pattern"));
static WIDE_WS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{3,}").expect("valid pattern"));
static WS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid pattern"));

// ASCII word class on purpose: non-Latin scripts are trimmed away entirely.
static EDGE_NON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^A-Za-z0-9_]+|[^A-Za-z0-9_]+$").expect("valid pattern"));

static KEY_DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9 \-]").expect("valid pattern"));
static HYPHEN_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").expect("valid pattern"));

static PARENTHETICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\)").expect("valid pattern"));

/// Separators that split a compound name into segments.
const SEGMENT_SEPARATORS: [char; 5] = ['/', '\\', '-', '\u{2013}', '\u{2014}'];

fn is_latin_combining(c: char) -> bool {
    ('\u{0300}'..='\u{036F}').contains(&c)
}

/// Canonical form used for cache keys and the last fallback variation:
/// trim, NFD-decompose, strip Latin combining marks, lowercase, collapse
/// whitespace, trim non-word edges. Empty input yields `""`.
pub fn normalize(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let stripped: String = trimmed.nfd().filter(|c| !is_latin_combining(*c)).collect();
    let lowered = stripped.to_lowercase();
    let collapsed = WS_RUN.replace_all(&lowered, " ");
    EDGE_NON_WORD.replace_all(&collapsed, "").to_string()
}

fn key_segment(name: &str) -> String {
    let normalized = normalize(name);
    let filtered = KEY_DISALLOWED.replace_all(&normalized, "");
    let hyphenated = filtered.replace(' ', "-");
    let collapsed = HYPHEN_RUN.replace_all(&hyphenated, "-");
    collapsed.trim_matches('-').to_string()
}

/// Deterministic cache key for a city/country pair. The output alphabet is
/// lowercase alphanumerics and single interior hyphens.
pub fn cache_key(city: &str, country: &str) -> String {
    let city_part = key_segment(city);
    let country_part = key_segment(country);

    match (city_part.is_empty(), country_part.is_empty()) {
        (_, true) => city_part,
        (true, false) => country_part,
        (false, false) => format!("{city_part}-{country_part}"),
    }
}

/// Shape check applied to the raw (untrimmed-of-meaning) city name before any
/// resolution work happens.
pub fn is_valid(name: &str) -> bool {
    let trimmed = name.trim();
    let length = trimmed.chars().count();
    if length == 0 || length > 100 {
        return false;
    }
    if !HAS_LETTER.is_match(trimmed) {
        return false;
    }
    if DOT_RUN.is_match(trimmed)
        || PUNCT_RUN.is_match(trimmed)
        || WIDE_WS_RUN.is_match(trimmed)
    {
        return false;
    }
    if BAD_EDGE_START.is_match(trimmed) || BAD_EDGE_END.is_match(trimmed) {
        return false;
    }
    true
}

/// Light cleanup for the provider query string: trims, collapses whitespace,
/// straightens smart quotes, turns en/em dashes into hyphens. Case and
/// structure are preserved.
pub fn clean_for_api(name: &str) -> String {
    let collapsed = WS_RUN.replace_all(name.trim(), " ");
    collapsed
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            other => other,
        })
        .collect()
}

/// Strip parenthetical segments, then keep the first separator-delimited
/// segment when it is longer than two characters.
pub fn extract_main_name(name: &str) -> String {
    let stripped = PARENTHETICAL.replace_all(name, "");
    let stripped = WS_RUN.replace_all(stripped.trim(), " ").to_string();

    if let Some(idx) = stripped.find(&SEGMENT_SEPARATORS[..]) {
        let first = stripped[..idx].trim();
        if first.chars().count() > 2 {
            return first.to_string();
        }
    }

    stripped
}

/// Ordered, de-duplicated retry variations for a city name. The original
/// always comes first; order defines the retry sequence against the provider.
pub fn fallback_names(name: &str) -> Vec<String> {
    let original = name.trim();
    if original.is_empty() {
        return Vec::new();
    }

    let mut names = vec![original.to_string()];

    let cleaned = clean_for_api(original);
    push_unique(&mut names, cleaned.clone());

    let main = extract_main_name(&cleaned);
    push_unique(&mut names, main);

    let normalized = normalize(original);
    if !normalized.is_empty() && normalized != original.to_lowercase() {
        push_unique(&mut names, normalized);
    }

    names
}

fn push_unique(names: &mut Vec<String>, candidate: String) {
    if !candidate.is_empty() && !names.contains(&candidate) {
        names.push(candidate);
    }
}

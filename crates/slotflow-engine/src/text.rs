//! Text helpers shared by the extractors and the reply classifier.
//!
//! Voice transcripts spell numbers out ("three sets of ten"), so everything
//! that looks for digits runs over [`normalize_numbers`] output first.

use std::sync::LazyLock;

use regex::{Captures, Regex};

const UNITS: &[(&str, u64)] = &[
    ("zero", 0),
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("eleven", 11),
    ("twelve", 12),
    ("thirteen", 13),
    ("fourteen", 14),
    ("fifteen", 15),
    ("sixteen", 16),
    ("seventeen", 17),
    ("eighteen", 18),
    ("nineteen", 19),
];

const TENS: &[(&str, u64)] = &[
    ("twenty", 20),
    ("thirty", 30),
    ("forty", 40),
    ("fifty", 50),
    ("sixty", 60),
    ("seventy", 70),
    ("eighty", 80),
    ("ninety", 90),
];

static NUMBER_WORDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    let words: Vec<&str> = UNITS
        .iter()
        .chain(TENS.iter())
        .map(|(w, _)| *w)
        .chain(std::iter::once("hundred"))
        .collect();
    // Longest first so "seventeen" wins over "seven".
    let mut sorted = words.clone();
    sorted.sort_by_key(|w| std::cmp::Reverse(w.len()));
    let word = format!("(?:{})", sorted.join("|"));
    Regex::new(&format!(
        r"(?i)\b{word}(?:(?:\s+|-)(?:and\s+)?{word})*\b",
        word = word
    ))
    .expect("Invalid number words regex")
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

/// Lowercase the text, collapse whitespace and replace spelled-out numbers
/// with digits.
pub fn normalize_numbers(text: &str) -> String {
    let lowered = text.to_lowercase();
    let collapsed = WHITESPACE_RE.replace_all(lowered.trim(), " ");
    NUMBER_WORDS_RE
        .replace_all(&collapsed, |caps: &Captures<'_>| {
            words_to_number(&caps[0]).to_string()
        })
        .into_owned()
}

fn words_to_number(phrase: &str) -> u64 {
    let mut total = 0;
    let mut current = 0;
    for word in phrase.split(|c: char| c.is_whitespace() || c == '-') {
        if word.is_empty() || word == "and" {
            continue;
        }
        if word == "hundred" {
            current = current.max(1) * 100;
            total += current;
            current = 0;
        } else if let Some((_, n)) = UNITS.iter().chain(TENS.iter()).find(|(w, _)| *w == word) {
            current += n;
        }
    }
    total + current
}

/// Byte offset of the first occurrence of `phrase` in `text` that sits on
/// word boundaries.
pub fn find_phrase(text: &str, phrase: &str) -> Option<usize> {
    if phrase.is_empty() {
        return None;
    }
    text.match_indices(phrase).map(|(i, _)| i).find(|&start| {
        let end = start + phrase.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = text[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

/// Whether `phrase` occurs in `text` on word boundaries.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    find_phrase(text, phrase).is_some()
}

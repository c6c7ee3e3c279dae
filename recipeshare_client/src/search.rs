use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref SEPARATORS: Regex = Regex::new(r"\p{Z}+").expect("separator pattern");
    static ref NON_ALNUM: Regex = Regex::new(r"[^\p{L}\p{Nd}]+").expect("alnum pattern");
}

/// Unicode combining diacritical marks block.
const COMBINING_MARKS: std::ops::RangeInclusive<char> = '\u{0300}'..='\u{036f}';

/// Folds a string for fuzzy matching: uppercase (which also expands
/// ligature-like characters, e.g. `ß` to `SS`), decompose diacritics and
/// strip the combining-mark part, then collapse separator runs and runs of
/// anything that is neither a letter nor a decimal digit to single spaces.
pub fn normalize(input: &str) -> String {
    let upper = input.to_uppercase();
    let stripped: String = upper
        .nfd()
        .filter(|c| !COMBINING_MARKS.contains(c))
        .collect();
    let spaced = SEPARATORS.replace_all(&stripped, " ");
    NON_ALNUM.replace_all(&spaced, " ").into_owned()
}

/// Multi-word containment: every word of the needle must occur somewhere in
/// the haystack, in any order. An empty or all-whitespace needle matches
/// everything.
pub fn smart_contains(haystack: &str, needle: &str) -> bool {
    let haystack = normalize(haystack);
    normalize(needle)
        .split_whitespace()
        .all(|word| haystack.contains(word))
}

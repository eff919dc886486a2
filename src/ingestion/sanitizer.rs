//! Normalization of raw model output before any structural scanning.
//!
//! Models regularly emit zero-width joiners, byte-order marks, curly quotes and
//! full-width/CJK punctuation inside otherwise valid JSON. Every replacement
//! target here is plain ASCII, so running the sanitizer twice is a no-op.

/// Zero-width space, non-joiner, joiner and the BOM.
const INVISIBLE: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

/// Punctuation variants mapped to their ASCII equivalent.
const REPLACEMENTS: [(char, char); 16] = [
    ('\u{201C}', '"'),  // “
    ('\u{201D}', '"'),  // ”
    ('\u{2018}', '\''), // ‘
    ('\u{2019}', '\''), // ’
    ('\u{FF3B}', '['),  // ［
    ('\u{FF3D}', ']'),  // ］
    ('\u{FF5B}', '{'),  // ｛
    ('\u{FF5D}', '}'),  // ｝
    ('\u{FF1A}', ':'),  // ：
    ('\u{FF0C}', ','),  // ，
    ('\u{3010}', '['),  // 【
    ('\u{3011}', ']'),  // 】
    ('\u{3014}', '['),  // 〔
    ('\u{3015}', ']'),  // 〕
    ('\u{3001}', ','),  // 、
    ('\u{3000}', ' '),  // ideographic space
];

/// Strip invisible characters and fold full-width/CJK punctuation to ASCII.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if INVISIBLE.contains(&c) {
            continue;
        }
        out.push(normalize_char(c));
    }
    out
}

/// Only the punctuation fold, leaving invisible characters alone.
pub fn normalize_punctuation(text: &str) -> String {
    text.chars().map(normalize_char).collect()
}

fn normalize_char(c: char) -> char {
    REPLACEMENTS
        .iter()
        .find(|(from, _)| *from == c)
        .map(|(_, to)| *to)
        .unwrap_or(c)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

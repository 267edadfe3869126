//! Locale-aware, case-insensitive label comparison.
//!
//! [Collator] is an explicit value handed to the resolver's sort, so resolution never depends
//! on process-wide locale state. With a locale, labels are compared on a three level key in the
//! manner of the Unicode collation algorithm: base letters first (canonical decomposition with
//! accents stripped, plus the per-language letters that sort after `z`), then accents, then
//! case. Without a locale the default ordering compares lower-cased code points.
use std::cmp::Ordering;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Letters that a language sorts as separate letters after `z`, in their alphabet order.
const NORDIC_SV: &[char] = &['å', 'ä', 'ö'];
const NORDIC_DA: &[char] = &['æ', 'ø', 'å'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tailoring {
    /// No locale: lower-cased code point order.
    CodePoint,
    Root,
    AfterZ(&'static [char]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collator {
    locale: Option<String>,
    tailoring: Tailoring,
}

impl Default for Collator {
    fn default() -> Self {
        Collator::new(None)
    }
}

/// Precomputed comparison key for one label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    primary: Vec<u64>,
    secondary: Vec<u32>,
    tertiary: Vec<u8>,
    raw: String,
}

impl Collator {
    pub fn new(locale: Option<&str>) -> Collator {
        let tailoring = match locale {
            None => Tailoring::CodePoint,
            Some(tag) => {
                let language = tag
                    .split(['-', '_'])
                    .next()
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                match language.as_str() {
                    "sv" | "fi" => Tailoring::AfterZ(NORDIC_SV),
                    "da" | "nb" | "nn" | "no" => Tailoring::AfterZ(NORDIC_DA),
                    _ => Tailoring::Root,
                }
            }
        };
        Collator {
            locale: locale.map(str::to_string),
            tailoring,
        }
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        self.sort_key(a).cmp(&self.sort_key(b))
    }

    pub fn sort_key(&self, label: &str) -> SortKey {
        let mut key = SortKey {
            primary: Vec::with_capacity(label.len()),
            secondary: Vec::new(),
            tertiary: Vec::with_capacity(label.len()),
            raw: label.to_string(),
        };
        for ch in label.chars() {
            let case = u8::from(ch.is_uppercase());
            for lower in ch.to_lowercase() {
                match self.tailoring {
                    Tailoring::CodePoint => {
                        key.primary.push(weight(lower));
                        key.tertiary.push(case);
                    }
                    Tailoring::AfterZ(letters) if letters.contains(&lower) => {
                        let pos = letters.iter().position(|l| *l == lower).unwrap_or_default();
                        key.primary.push(weight('z') + 1 + pos as u64);
                        key.secondary.push(0);
                        key.tertiary.push(case);
                    }
                    Tailoring::Root | Tailoring::AfterZ(_) => {
                        push_decomposed(&mut key, lower, case);
                    }
                }
            }
        }
        key
    }
}

fn weight(ch: char) -> u64 {
    // Leave room between letters for tailored insertions.
    (ch as u64) << 8
}

fn push_decomposed(key: &mut SortKey, ch: char, case: u8) {
    match ch {
        'ß' => {
            for base in ['s', 's'] {
                key.primary.push(weight(base));
                key.secondary.push(0);
                key.tertiary.push(case);
            }
            return;
        }
        'æ' | 'œ' => {
            let first = if ch == 'æ' { 'a' } else { 'o' };
            for base in [first, 'e'] {
                key.primary.push(weight(base));
                key.secondary.push(0);
                key.tertiary.push(case);
            }
            return;
        }
        _ => {}
    }
    for part in std::iter::once(ch).nfd() {
        if is_combining_mark(part) {
            key.secondary.push(part as u32);
        } else {
            key.primary.push(weight(part));
            key.secondary.push(0);
            key.tertiary.push(case);
        }
    }
}

//! Grapheme-to-IPA phonemizer for normalised Dutch text.
//!
//! Translation walks the input left to right taking the longest matching
//! grapheme cluster at each position (trigraphs before digraphs before single
//! characters), so `sch` wins over `s`+`ch` and `ij` over `i`+`j`. Spaces in
//! the input are skipped; emitted phonemes are joined by single spaces.
//! Characters without a mapping (digits, stray symbols) are dropped.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::OnceLock;

use lru::LruCache;
use parking_lot::Mutex;

use crate::phonetics::distance::levenshtein_str;

/// Bound on the memoised grapheme→IPA translations.
const CACHE_CAPACITY: usize = 2000;

/// Grapheme clusters, longest first. Order within a length group is
/// irrelevant; lookup is exact per cluster.
const CLUSTERS: &[(&str, &str)] = &[
    ("sch", "sx"),
    ("aa", "aː"),
    ("ee", "eː"),
    ("ie", "iː"),
    ("oo", "oː"),
    ("uu", "y"),
    ("oe", "u"),
    ("eu", "øː"),
    ("ui", "œy"),
    ("ij", "ɛi"),
    ("ei", "ɛi"),
    ("ou", "ʌu"),
    ("au", "ʌu"),
    ("ng", "ŋ"),
    ("ch", "x"),
    ("sj", "ʃ"),
    ("ck", "k"),
    ("a", "ɑ"),
    ("b", "b"),
    ("c", "k"),
    ("d", "d"),
    ("e", "ə"),
    ("f", "f"),
    ("g", "x"),
    ("h", "ɦ"),
    ("i", "ɪ"),
    ("j", "j"),
    ("k", "k"),
    ("l", "l"),
    ("m", "m"),
    ("n", "n"),
    ("o", "ɔ"),
    ("p", "p"),
    ("q", "k"),
    ("r", "r"),
    ("s", "s"),
    ("t", "t"),
    ("u", "ʏ"),
    ("v", "v"),
    ("w", "ʋ"),
    ("x", "ks"),
    ("y", "iː"),
    ("z", "z"),
];

/// Dutch vowel phonemes; substitutions between a vowel and a non-vowel cost
/// double in [`phoneme_distance`].
const VOWELS: &[&str] = &[
    "ɑ", "ə", "ɪ", "ɔ", "ʏ", "aː", "eː", "iː", "oː", "y", "u", "ɛi", "œy", "ʌu", "øː",
];

fn cluster_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| CLUSTERS.iter().copied().collect())
}

fn cache() -> &'static Mutex<LruCache<String, String>> {
    static CACHE: OnceLock<Mutex<LruCache<String, String>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero cache capacity"),
        ))
    })
}

pub fn is_vowel_phoneme(phoneme: &str) -> bool {
    VOWELS.contains(&phoneme)
}

/// Translates normalised Dutch text into a space-separated phoneme string.
///
/// Results are memoised in a bounded LRU shared across threads.
pub fn phonemize(text: &str) -> String {
    if let Some(hit) = cache().lock().get(text) {
        return hit.clone();
    }
    let phonemes = translate(text);
    cache().lock().put(text.to_owned(), phonemes.clone());
    phonemes
}

fn translate(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let map = cluster_map();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == ' ' {
            i += 1;
            continue;
        }
        let mut advanced = false;
        for len in (1..=3usize.min(chars.len() - i)).rev() {
            let cluster: String = chars[i..i + len].iter().collect();
            if let Some(phoneme) = map.get(cluster.as_str()) {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(phoneme);
                i += len;
                advanced = true;
                break;
            }
        }
        if !advanced {
            i += 1;
        }
    }
    out
}

/// Weighted Levenshtein distance over phoneme tokens.
///
/// Insertions and deletions cost 1; a substitution costs 1, or 2 when exactly
/// one side is a vowel phoneme (a vowel-for-consonant confusion is a stronger
/// signal of a different word than consonant drift).
pub fn phoneme_distance(a: &str, b: &str) -> usize {
    let a: Vec<&str> = a.split_whitespace().collect();
    let b: Vec<&str> = b.split_whitespace().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for (i, pa) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, pb) in b.iter().enumerate() {
            let sub_cost = if pa == pb {
                0
            } else if is_vowel_phoneme(pa) != is_vowel_phoneme(pb) {
                2
            } else {
                1
            };
            curr[j + 1] = (prev[j] + sub_cost)
                .min(prev[j + 1] + 1)
                .min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Phoneme similarity in `[0, 1]`; `1.0` for two empty sequences.
pub fn phoneme_similarity(a: &str, b: &str) -> f64 {
    let len_a = a.split_whitespace().count();
    let len_b = b.split_whitespace().count();
    let max_len = len_a.max(len_b);
    if max_len == 0 {
        return 1.0;
    }
    let sim = 1.0 - phoneme_distance(a, b) as f64 / max_len as f64;
    sim.clamp(0.0, 1.0)
}

/// Character-level Levenshtein over compacted (space-free) phoneme strings.
/// Used by the number filter, which compares against short reference forms.
pub fn compact_phoneme_distance(a: &str, b: &str) -> usize {
    let a: String = a.chars().filter(|c| *c != ' ').collect();
    let b: String = b.chars().filter(|c| *c != ' ').collect();
    levenshtein_str(&a, &b)
}

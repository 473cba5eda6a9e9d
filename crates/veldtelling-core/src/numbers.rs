//! Dutch cardinal recognition.
//!
//! Counts are spoken after a species name ("koolmees vijf"), so the matcher
//! needs to (a) parse count tokens and (b) keep number-like aliases out of
//! the species candidate set. Besides literal word/digit parsing this module
//! exposes phonetic number filters: an utterance that *encodes* like a number
//! word is suppressed as a species candidate even when its spelling drifted.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::phonetics::{cologne, ipa};
use crate::types::AliasRecord;

/// Simple cardinals, "nul" through "twintig".
const SIMPLE: &[(&str, u32)] = &[
    ("nul", 0),
    ("een", 1),
    ("twee", 2),
    ("drie", 3),
    ("vier", 4),
    ("vijf", 5),
    ("zes", 6),
    ("zeven", 7),
    ("acht", 8),
    ("negen", 9),
    ("tien", 10),
    ("elf", 11),
    ("twaalf", 12),
    ("dertien", 13),
    ("veertien", 14),
    ("vijftien", 15),
    ("zestien", 16),
    ("zeventien", 17),
    ("achttien", 18),
    ("negentien", 19),
    ("twintig", 20),
];

/// Decadic cardinals above twenty.
const DECADES: &[(&str, u32)] = &[
    ("dertig", 30),
    ("veertig", 40),
    ("vijftig", 50),
    ("zestig", 60),
    ("zeventig", 70),
    ("tachtig", 80),
    ("negentig", 90),
];

/// Decades that form `<unit>en<decade>` compounds ("drieentwintig" after
/// diacritic folding).
const COMPOUND_DECADES: &[(&str, u32)] = &[
    ("twintig", 20),
    ("dertig", 30),
    ("veertig", 40),
    ("vijftig", 50),
    ("zestig", 60),
    ("zeventig", 70),
    ("tachtig", 80),
    ("negentig", 90),
];

fn digit_regex() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"^[0-9]{1,2}$").expect("valid digit pattern"))
}

fn lookup(table: &[(&str, u32)], token: &str) -> Option<u32> {
    table
        .iter()
        .find(|(word, _)| *word == token)
        .map(|(_, value)| *value)
}

/// Parses a single normalised token as a Dutch cardinal.
///
/// Accepts digit strings 0–99, the simple and decadic number words, and the
/// productive `<unit>en<decade>` compounds (21–99).
pub fn parse_number_word(token: &str) -> Option<u32> {
    if digit_regex().is_match(token) {
        return token.parse().ok();
    }
    if let Some(value) = lookup(SIMPLE, token) {
        return Some(value);
    }
    if let Some(value) = lookup(DECADES, token) {
        return Some(value);
    }
    if token == "honderd" {
        return Some(100);
    }
    for (decade_word, decade) in COMPOUND_DECADES {
        if let Some(head) = token.strip_suffix(decade_word) {
            if let Some(unit_word) = head.strip_suffix("en") {
                if let Some(unit @ 1..=9) = lookup(SIMPLE, unit_word) {
                    return Some(decade + unit);
                }
            }
        }
    }
    None
}

pub fn is_number_word(token: &str) -> bool {
    parse_number_word(token).is_some()
}

/// Cologne codes of the known number words. Derived from this crate's own
/// encoder so the filter can never drift from the encoding.
fn number_cologne_codes() -> &'static HashSet<String> {
    static CODES: OnceLock<HashSet<String>> = OnceLock::new();
    CODES.get_or_init(|| {
        number_words()
            .map(cologne::encode)
            .filter(|code| !code.is_empty())
            .collect()
    })
}

/// Compacted IPA forms of the known number words ("vɛif", "eːn", ...).
fn number_phoneme_forms() -> &'static Vec<String> {
    static FORMS: OnceLock<Vec<String>> = OnceLock::new();
    FORMS.get_or_init(|| {
        number_words()
            .map(|word| ipa::phonemize(word).replace(' ', ""))
            .filter(|form| !form.is_empty())
            .collect()
    })
}

fn number_words() -> impl Iterator<Item = &'static str> {
    SIMPLE
        .iter()
        .chain(DECADES.iter())
        .map(|(word, _)| *word)
        .chain(std::iter::once("honderd"))
}

/// Whether a Cologne code belongs to a known number word.
pub fn is_number_cologne(code: &str) -> bool {
    !code.is_empty() && number_cologne_codes().contains(code)
}

/// Whether a phoneme sequence sounds like a number word: exact hit on the
/// reference set, or within Levenshtein distance 1 of any member.
pub fn is_number_phoneme(phonemes: &str) -> bool {
    let compact: String = phonemes.chars().filter(|c| *c != ' ').collect();
    if compact.is_empty() {
        return false;
    }
    number_phoneme_forms()
        .iter()
        .any(|form| *form == compact || ipa::compact_phoneme_distance(form, &compact) <= 1)
}

/// Composite predicate: does this alias record resemble a number in text,
/// Cologne code or phonemes? Used to keep counts out of species candidates.
pub fn is_number_candidate(record: &AliasRecord) -> bool {
    let tokens: Vec<&str> = record.norm.split(' ').filter(|t| !t.is_empty()).collect();
    if !tokens.is_empty() && tokens.iter().all(|t| is_number_word(t)) {
        return true;
    }
    if let Some(code) = record.cologne.as_deref() {
        if is_number_cologne(code) {
            return true;
        }
    }
    if let Some(phonemes) = record.phonemes.as_deref() {
        if is_number_phoneme(phonemes) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AliasRecord, AliasSource};
    use rstest::rstest;

    #[rstest]
    #[case("nul", 0)]
    #[case("een", 1)]
    #[case("vijf", 5)]
    #[case("twaalf", 12)]
    #[case("achttien", 18)]
    #[case("twintig", 20)]
    #[case("dertig", 30)]
    #[case("negentig", 90)]
    #[case("honderd", 100)]
    #[case("0", 0)]
    #[case("7", 7)]
    #[case("99", 99)]
    #[case("eenentwintig", 21)]
    #[case("tweeentwintig", 22)]
    #[case("vijfenveertig", 45)]
    #[case("negenennegentig", 99)]
    fn parses(#[case] token: &str, #[case] expected: u32) {
        assert_eq!(parse_number_word(token), Some(expected));
    }

    #[rstest]
    #[case("koolmees")]
    #[case("100")]
    #[case("vijfen")]
    #[case("entwintig")]
    #[case("nulentwintig")]
    #[case("")]
    fn rejects(#[case] token: &str) {
        assert_eq!(parse_number_word(token), None);
    }

    #[test]
    fn predicate_agrees_with_parser() {
        for token in ["vijf", "twintig", "42", "vijfenveertig", "buizerd", ""] {
            assert_eq!(is_number_word(token), parse_number_word(token).is_some());
        }
    }

    #[test]
    fn cologne_filter_covers_number_words() {
        assert!(is_number_cologne(&cologne::encode("vijf")));
        assert!(is_number_cologne(&cologne::encode("zeventien")));
        assert!(!is_number_cologne(&cologne::encode("koolmees")));
        assert!(!is_number_cologne(""));
    }

    #[test]
    fn phoneme_filter_tolerates_one_edit() {
        let vijf = ipa::phonemize("vijf");
        assert!(is_number_phoneme(&vijf));
        // One phoneme off still reads as a number.
        assert!(is_number_phoneme("v ɛi s"));
        assert!(!is_number_phoneme(&ipa::phonemize("aalscholver")));
        assert!(!is_number_phoneme(""));
    }

    fn record(norm: &str, cologne_code: Option<&str>, phonemes: Option<&str>) -> AliasRecord {
        AliasRecord {
            alias_id: "1_1".into(),
            species_id: "1".into(),
            canonical: "Testsoort".into(),
            tilename: None,
            alias: norm.into(),
            norm: norm.into(),
            cologne: cologne_code.map(str::to_owned),
            phonemes: phonemes.map(str::to_owned),
            weight: 1.0,
            source: AliasSource::UserFieldTraining,
        }
    }

    #[test]
    fn number_candidates_are_flagged() {
        assert!(is_number_candidate(&record("vijf", None, None)));
        assert!(is_number_candidate(&record("twee drie", None, None)));
        let code = cologne::encode("zeven");
        assert!(is_number_candidate(&record("zeuven", Some(&code), None)));
        assert!(!is_number_candidate(&record("buizerd", None, None)));
    }
}

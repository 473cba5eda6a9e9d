//! Cologne phonetic encoding, adapted for Dutch input.
//!
//! Consonants map to digit classes; vowels only survive in leading position
//! and otherwise act as separators between identical consonant classes.
//! Diacritics are folded through [`crate::text::normalise`] before encoding,
//! which also covers the ij/ei spelling variation well enough for the code to
//! act as a shortlist signal (the IPA phonemizer does the precise work).

use crate::phonetics::distance::levenshtein_str;
use crate::text::normalise;

/// Encodes text to its Cologne code.
///
/// Non-letter input contributes nothing; fully non-letter input yields the
/// empty string. Encoding never fails.
pub fn encode(text: &str) -> String {
    let letters: Vec<char> = normalise(text)
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return String::new();
    }

    let mut raw = String::with_capacity(letters.len());
    let mut last: Option<char> = None;
    let mut push = |raw: &mut String, last: &mut Option<char>, code: char| {
        if *last != Some(code) {
            raw.push(code);
        }
        *last = Some(code);
    };

    for (i, &c) in letters.iter().enumerate() {
        let prev = if i > 0 { Some(letters[i - 1]) } else { None };
        let next = letters.get(i + 1).copied();

        let code = match c {
            'a' | 'e' | 'i' | 'j' | 'o' | 'u' | 'y' => Some('0'),
            'b' => Some('1'),
            'p' => Some(if next == Some('h') { '3' } else { '1' }),
            'd' | 't' => Some(if matches!(next, Some('c') | Some('s') | Some('z')) {
                '8'
            } else {
                '2'
            }),
            'f' | 'v' | 'w' => Some('3'),
            'g' | 'k' | 'q' => Some('4'),
            'c' => {
                let before_ahkoqux = matches!(
                    next,
                    Some('a') | Some('h') | Some('k') | Some('o') | Some('q') | Some('u')
                        | Some('x')
                );
                if i == 0 {
                    if before_ahkoqux || matches!(next, Some('l') | Some('r')) {
                        Some('4')
                    } else {
                        Some('8')
                    }
                } else if matches!(prev, Some('s') | Some('z')) {
                    Some('8')
                } else if before_ahkoqux {
                    Some('4')
                } else {
                    Some('8')
                }
            }
            'x' => {
                if matches!(prev, Some('c') | Some('k') | Some('q')) {
                    Some('8')
                } else {
                    push(&mut raw, &mut last, '4');
                    Some('8')
                }
            }
            'l' => Some('5'),
            'm' | 'n' => Some('6'),
            'r' => Some('7'),
            's' | 'z' => Some('8'),
            'h' => None,
            _ => None,
        };

        if let Some(code) = code {
            push(&mut raw, &mut last, code);
        }
    }

    // Vowel class survives only in leading position.
    let mut out = String::with_capacity(raw.len());
    for (i, c) in raw.chars().enumerate() {
        if c != '0' || i == 0 {
            out.push(c);
        }
    }
    out
}

/// Similarity of the Cologne codes of two strings, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let code_a = encode(a);
    let code_b = encode(b);
    similarity_of_codes(&code_a, &code_b)
}

/// Similarity over already-encoded codes; `1.0` when both are empty.
pub fn similarity_of_codes(code_a: &str, code_b: &str) -> f64 {
    let max_len = code_a.len().max(code_b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_str(code_a, code_b) as f64 / max_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("müller", "657")]
    #[case("muller", "657")]
    #[case("vijf", "33")]
    #[case("aalscholver", "058537")]
    #[case("sch", "8")]
    #[case("", "")]
    #[case("12 34", "")]
    fn encodes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(encode(input), expected);
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(encode("Buizerd"), encode("buizerd"));
        assert_eq!(encode("fûut"), encode("fuut"));
    }

    #[test]
    fn spelling_variants_share_a_code() {
        // The classic motivating example and a Dutch pair.
        assert_eq!(encode("Müller"), encode("Mueller"));
        assert_eq!(encode("ijsvogel"), encode("eisvogel"));
    }

    #[test]
    fn similarity_range() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("koolmees", "koolmees"), 1.0);
        let s = similarity("aalscholver", "alsgolver");
        assert!(s > 0.5 && s <= 1.0, "got {s}");
        assert!(similarity("koolmees", "r") < 0.5);
    }
}

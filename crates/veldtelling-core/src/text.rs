//! Text normalisation and tokenisation for Dutch speech transcripts.
//!
//! Everything downstream (exact lookup, edit distances, phonetic encoders)
//! operates on the normalised form produced here, so normalisation must be
//! idempotent and stable: `normalise(normalise(s)) == normalise(s)`.

/// Folds a single accented character to its base letter.
///
/// Covers the accents that occur in Dutch field names and in ASR output of
/// Dutch speech; anything outside the set passes through unchanged.
fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

/// Normalises raw transcript text for matching.
///
/// Lowercases, folds diacritics, replaces every non-alphanumeric character
/// with a space (so word boundaries survive punctuation), collapses runs of
/// whitespace to a single space and trims the ends.
pub fn normalise(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        let folded = fold_diacritic(c);
        if folded.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(folded);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Splits text into normalised word tokens. Empty tokens are discarded.
pub fn tokenise(text: &str) -> Vec<String> {
    normalise(text)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Koolmees", "koolmees")]
    #[case("  Grote  Bonte   Specht ", "grote bonte specht")]
    #[case("fûut", "fuut")]
    #[case("Héggemus!", "heggemus")]
    #[case("ij's-vogel", "ij s vogel")]
    #[case("Kuifeend, 5", "kuifeend 5")]
    #[case("", "")]
    #[case("---", "")]
    fn normalises(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalise(input), expected);
    }

    #[test]
    fn normalise_is_idempotent() {
        for s in ["Aalscholver", "  çà-vá ", "Tjiftjaf 12", "ñandoe"] {
            let once = normalise(s);
            assert_eq!(normalise(&once), once);
        }
    }

    #[test]
    fn folds_full_diacritic_set() {
        assert_eq!(normalise("àáâãäå çè éêë ìíîï ñ òóôõö ùúûü ýÿ"), "aaaaaa ce eee iiii n ooooo uuuu yy");
    }

    #[test]
    fn tokenise_drops_empty_tokens() {
        assert_eq!(tokenise("  buizerd   twee  "), vec!["buizerd", "twee"]);
        assert!(tokenise(" .,! ").is_empty());
    }

    #[test]
    fn word_boundaries_survive_punctuation() {
        assert_eq!(tokenise("koolmees,vijf"), vec!["koolmees", "vijf"]);
    }
}

//! Phonetic encoders and distances used by the fuzzy matcher.
//!
//! Two complementary encodings are kept per alias: a Cologne-style consonant
//! class code (cheap, good shortlist signal) and an IPA phoneme sequence
//! (more precise, used for the final score blend).

pub mod cologne;
pub mod distance;
pub mod ipa;

pub use cologne::{encode as cologne_encode, similarity as cologne_similarity};
pub use distance::{levenshtein, levenshtein_str, string_similarity};
pub use ipa::{phonemize, phoneme_distance, phoneme_similarity};

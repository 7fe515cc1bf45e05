use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

/// Two letters, one or two digits, one or two letters, one to four digits.
pub const DEFAULT_PLATE_PATTERN: &str = r"^[A-Z]{2}[0-9]{1,2}[A-Z]{1,2}[0-9]{1,4}$";

lazy_static! {
    static ref DEFAULT_GRAMMAR: PlateGrammar =
        PlateGrammar::new(DEFAULT_PLATE_PATTERN).expect("default plate pattern compiles");
}

/// OCR text reduced to uppercase alphanumerics that matched the plate grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlateCandidate(String);

impl PlateCandidate {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PlateCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Drops everything that is not a letter or digit and uppercases the rest.
/// Non-ASCII alphanumerics are kept, so the grammar sees and rejects them.
pub fn prefilter(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

#[derive(Debug, Clone)]
pub struct PlateGrammar {
    pattern: Regex,
}

impl PlateGrammar {
    /// Compiles `pattern` anchored at both ends, whether or not it already carries anchors.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self { pattern })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    pub fn normalize_and_validate(&self, raw: &str) -> Option<PlateCandidate> {
        let cleaned = prefilter(raw);
        if self.matches(&cleaned) {
            Some(PlateCandidate(cleaned))
        } else {
            None
        }
    }
}

impl Default for PlateGrammar {
    fn default() -> Self {
        DEFAULT_GRAMMAR.clone()
    }
}

/// Validates against the default grammar.
pub fn normalize_and_validate(raw: &str) -> Option<PlateCandidate> {
    DEFAULT_GRAMMAR.normalize_and_validate(raw)
}

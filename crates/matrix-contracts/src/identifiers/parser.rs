use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z]+)([0-9]+)([a-zA-Z]?)$").expect("valid identifier regex")
});

// The identifier may be followed by one boundary character and free text,
// e.g. `x001_desc`, `X7 final`, `a3猫`.
static FILE_STEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([a-zA-Z]+)([0-9]+)([a-zA-Z]?)(?:[.\-_ \x{4E00}-\x{9FA5}].*)?$")
        .expect("valid file stem regex")
});

/// A `(prefix, number, suffix)` triple such as `x7b`.
///
/// Prefix and suffix are stored lowercased and the number is numeric, so
/// `X007` and `x7` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identifier {
    pub prefix: String,
    pub number: u64,
    pub suffix: Option<char>,
}

impl Identifier {
    pub fn new(prefix: &str, number: u64, suffix: Option<char>) -> Self {
        Self {
            prefix: prefix.to_ascii_lowercase(),
            number,
            suffix: suffix.map(|value| value.to_ascii_lowercase()),
        }
    }

    fn from_captures(captures: &Captures<'_>) -> Option<Self> {
        let prefix = captures.get(1)?.as_str();
        let number = captures.get(2)?.as_str().parse::<u64>().ok()?;
        let suffix = captures
            .get(3)
            .and_then(|value| value.as_str().chars().next());
        Some(Self::new(prefix, number, suffix))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.number)?;
        if let Some(suffix) = self.suffix {
            write!(f, "{suffix}")?;
        }
        Ok(())
    }
}

/// Parses a whole token (after trimming) as an identifier.
///
/// Partial matches are rejected: `7x`, `x7bb` and `x1y2` all yield `None`,
/// as does a digit run too large for `u64`.
pub fn parse_identifier(text: &str) -> Option<Identifier> {
    let captures = IDENTIFIER_RE.captures(text.trim())?;
    Identifier::from_captures(&captures)
}

/// Parses a file stem, tolerating descriptive text after the identifier.
pub fn parse_file_stem(stem: &str) -> Option<Identifier> {
    let captures = FILE_STEM_RE.captures(stem)?;
    Identifier::from_captures(&captures)
}

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::slots::EMPTY_SLOT;

static ALNUM_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9]+").expect("valid alnum regex"));

const REMAINDER_LEAD: &[char] = &[' ', ':', '：', '-', '_', '.'];

/// Character class for one position of an extraction template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharRule {
    Any,
    Letter,
    Upper,
    Lower,
    Digit,
    Ignore,
}

impl CharRule {
    fn class(self) -> &'static str {
        match self {
            Self::Any => "[a-zA-Z0-9]",
            Self::Letter => "[a-zA-Z]",
            Self::Upper => "[A-Z]",
            Self::Lower => "[a-z]",
            Self::Digit => "[0-9]",
            Self::Ignore => "",
        }
    }
}

impl fmt::Display for CharRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Letter => "letter",
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Digit => "digit",
            Self::Ignore => "ignore",
        };
        f.write_str(name)
    }
}

impl FromStr for CharRule {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "letter" => Ok(Self::Letter),
            "upper" => Ok(Self::Upper),
            "lower" => Ok(Self::Lower),
            "digit" => Ok(Self::Digit),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!(
                "unknown character rule '{other}' (expected any, letter, upper, lower, digit or ignore)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractMode {
    /// 3–5 alphanumerics containing at least one digit.
    Heuristic,
    Template([CharRule; 5]),
}

impl ExtractMode {
    fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        match self {
            Self::Heuristic => ALNUM_RUN_RE
                .find_iter(text)
                .filter(|run| {
                    (3..=5).contains(&run.len())
                        && run.as_str().bytes().any(|byte| byte.is_ascii_digit())
                })
                .map(|run| (run.start(), run.end()))
                .collect(),
            Self::Template(rules) => {
                let pattern: String = rules.iter().map(|rule| rule.class()).collect();
                if pattern.is_empty() {
                    return Vec::new();
                }
                match Regex::new(&pattern) {
                    Ok(re) => re
                        .find_iter(text)
                        .map(|found| (found.start(), found.end()))
                        .collect(),
                    Err(err) => {
                        warn!(pattern, error = %err, "invalid extraction template");
                        Vec::new()
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub id: String,
    pub remainder: String,
    pub combined: String,
}

impl Extraction {
    fn not_found() -> Self {
        Self {
            id: EMPTY_SLOT.to_string(),
            remainder: String::new(),
            combined: EMPTY_SLOT.to_string(),
        }
    }
}

/// Picks the `match_index`-th (1-based) identifier-like token in `text` and
/// the description that follows it.
///
/// `remainder_length` of 0 keeps the whole remainder.
pub fn extract(
    text: &str,
    mode: &ExtractMode,
    match_index: usize,
    remainder_length: usize,
) -> Extraction {
    let spans = mode.spans(text);
    let Some(&(start, end)) = match_index
        .checked_sub(1)
        .and_then(|idx| spans.get(idx))
    else {
        warn!(match_index, matches = spans.len(), "identifier match not found");
        return Extraction::not_found();
    };

    let id = text[start..end].to_string();
    let tail = text[end..].trim_start_matches(REMAINDER_LEAD).trim();
    let remainder: String = if remainder_length > 0 {
        tail.chars().take(remainder_length).collect()
    } else {
        tail.to_string()
    };
    let combined = if remainder.is_empty() {
        id.clone()
    } else {
        format!("{id} {remainder}")
    };
    Extraction {
        id,
        remainder,
        combined,
    }
}

#[cfg(test)]
mod tests {
    use super::{extract, CharRule, ExtractMode};

    #[test]
    fn heuristic_skips_pure_alpha_runs() {
        let result = extract("Order ABC12 shipped today", &ExtractMode::Heuristic, 1, 0);
        assert_eq!(result.id, "ABC12");
        assert_eq!(result.remainder, "shipped today");
        assert_eq!(result.combined, "ABC12 shipped today");

        let none = extract("ABC DEFG", &ExtractMode::Heuristic, 1, 0);
        assert_eq!(none.id, "0");
        assert_eq!(none.combined, "0");
    }

    #[test]
    fn heuristic_rejects_runs_outside_length_window() {
        let result = extract("A1 B123456 x12: tall tree", &ExtractMode::Heuristic, 1, 0);
        assert_eq!(result.id, "x12");
        assert_eq!(result.remainder, "tall tree");
    }

    #[test]
    fn nth_match_and_remainder_truncation() {
        let text = "a01：red coat. b02 - blue hat";
        let second = extract(text, &ExtractMode::Heuristic, 2, 0);
        assert_eq!(second.id, "b02");
        assert_eq!(second.remainder, "blue hat");

        let first = extract(text, &ExtractMode::Heuristic, 1, 3);
        assert_eq!(first.id, "a01");
        assert_eq!(first.remainder, "red");
        assert_eq!(first.combined, "a01 red");
    }

    #[test]
    fn out_of_range_index_returns_sentinel() {
        let result = extract("x12", &ExtractMode::Heuristic, 2, 0);
        assert_eq!(
            (result.id.as_str(), result.remainder.as_str(), result.combined.as_str()),
            ("0", "", "0")
        );
        let zero = extract("x12", &ExtractMode::Heuristic, 0, 0);
        assert_eq!(zero.id, "0");
    }

    #[test]
    fn template_mode_builds_character_classes() {
        let mode = ExtractMode::Template([
            CharRule::Upper,
            CharRule::Upper,
            CharRule::Digit,
            CharRule::Ignore,
            CharRule::Ignore,
        ]);
        let result = extract("see ref AB7_cover and CD9", &mode, 1, 0);
        assert_eq!(result.id, "AB7");
        assert_eq!(result.remainder, "cover and CD9");

        let second = extract("see ref AB7_cover and CD9", &mode, 2, 0);
        assert_eq!(second.id, "CD9");
        assert_eq!(second.remainder, "");
        assert_eq!(second.combined, "CD9");
    }

    #[test]
    fn template_mode_without_classes_never_matches() {
        let mode = ExtractMode::Template([CharRule::Ignore; 5]);
        assert_eq!(extract("abc123", &mode, 1, 0).id, "0");
    }

    #[test]
    fn char_rule_parses_case_insensitively() {
        assert_eq!("Digit".parse::<CharRule>(), Ok(CharRule::Digit));
        assert_eq!(" IGNORE ".parse::<CharRule>(), Ok(CharRule::Ignore));
        assert!("vowel".parse::<CharRule>().is_err());
        assert_eq!(CharRule::Letter.to_string(), "letter");
    }
}

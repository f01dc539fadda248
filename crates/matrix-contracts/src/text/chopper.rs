use serde::Serialize;
use tracing::warn;

pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chopped {
    pub middle: String,
    pub left: String,
    pub right: String,
    pub concat: String,
}

impl Chopped {
    fn not_available() -> Self {
        Self {
            middle: NOT_AVAILABLE.to_string(),
            left: NOT_AVAILABLE.to_string(),
            right: NOT_AVAILABLE.to_string(),
            concat: NOT_AVAILABLE.to_string(),
        }
    }
}

/// Cuts `text` around the `match_index`-th (1-based) `left_delim` and the
/// first `right_delim` after it.
///
/// `left` and `right` never contain the delimiters; `include_delimiters`
/// only widens `middle`. The right delimiter search begins right after the
/// chosen left delimiter, so `chop("004-[content]-tail", "-", "]", 1, false)`
/// keeps the `[` inside `middle`.
pub fn chop(
    text: &str,
    left_delim: &str,
    right_delim: &str,
    match_index: usize,
    include_delimiters: bool,
) -> Chopped {
    if text.is_empty() || left_delim.is_empty() || right_delim.is_empty() || match_index == 0 {
        return Chopped::not_available();
    }

    let mut cursor = 0;
    let mut left_start = None;
    for _ in 0..match_index {
        let Some(found) = text[cursor..].find(left_delim) else {
            left_start = None;
            break;
        };
        left_start = Some(cursor + found);
        cursor += found + left_delim.len();
    }
    let Some(left_start) = left_start else {
        warn!(match_index, left_delim, "left delimiter occurrence not found");
        return Chopped::not_available();
    };
    let left_end = left_start + left_delim.len();

    let Some(right_offset) = text[left_end..].find(right_delim) else {
        warn!(right_delim, "right delimiter not found after left delimiter");
        return Chopped::not_available();
    };
    let right_start = left_end + right_offset;
    let right_end = right_start + right_delim.len();

    let middle = if include_delimiters {
        &text[left_start..right_end]
    } else {
        &text[left_end..right_start]
    };
    let left = &text[..left_start];
    let right = &text[right_end..];
    Chopped {
        middle: middle.to_string(),
        left: left.to_string(),
        right: right.to_string(),
        concat: format!("{left}{right}"),
    }
}

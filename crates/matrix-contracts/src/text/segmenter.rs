use serde::Serialize;
use tracing::warn;

use crate::slots::{fill_slots, SlotCount, EMPTY_SLOT};

/// Bracket styles offered by the splitter node.
pub const BRACKET_STYLES: &[&str] = &[
    "[]", "{}", "()", "<>", "''", "\"\"", "【】", "《》", "（）", "“”",
];

/// Separators offered by the splitter node.
pub const SEPARATORS: &[&str] = &[
    "|", ",", "-", "_", "+", "=", "&", "@", "#", "$", "%", "^", "*", "~",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketPair {
    pub open: String,
    pub close: String,
}

impl BracketPair {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    /// Splits a two-character style such as `[]` or `【】`.
    pub fn from_style(style: &str) -> Option<Self> {
        let mut chars = style.chars();
        let open = chars.next()?;
        let close = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        Some(Self::new(open, close))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segmented {
    pub slots: Vec<String>,
    pub group_found: bool,
}

/// Every non-greedy `open … close` span, left to right, without overlap.
pub fn bracket_groups<'a>(text: &'a str, open: &str, close: &str) -> Vec<&'a str> {
    let mut groups = Vec::new();
    if open.is_empty() || close.is_empty() {
        return groups;
    }
    let mut cursor = 0;
    while let Some(found) = text[cursor..].find(open) {
        let content_start = cursor + found + open.len();
        let Some(content_len) = text[content_start..].find(close) else {
            break;
        };
        groups.push(&text[content_start..content_start + content_len]);
        cursor = content_start + content_len + close.len();
    }
    groups
}

/// Splits the `group_index`-th (1-based) bracket group on `separator` into a
/// slot vector. A missing group yields all [`EMPTY_SLOT`] values.
pub fn segment(
    text: &str,
    open: &str,
    close: &str,
    group_index: usize,
    separator: &str,
    slot_count: SlotCount,
) -> Segmented {
    let groups = bracket_groups(text, open, close);
    let Some(content) = group_index
        .checked_sub(1)
        .and_then(|idx| groups.get(idx))
    else {
        warn!(
            group_index,
            groups = groups.len(),
            "bracket group not found"
        );
        return Segmented {
            slots: vec![EMPTY_SLOT.to_string(); slot_count.len()],
            group_found: false,
        };
    };

    let slots = if separator.is_empty() {
        fill_slots([content.trim()], slot_count)
    } else {
        fill_slots(content.split(separator).map(str::trim), slot_count)
    };
    Segmented {
        slots,
        group_found: true,
    }
}

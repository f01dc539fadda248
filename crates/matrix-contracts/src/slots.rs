use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Value written into a slot that has nothing to hold.
pub const EMPTY_SLOT: &str = "0";

/// Node variants come in 5- and 10-slot widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotCount {
    Five,
    Ten,
}

impl SlotCount {
    pub fn len(self) -> usize {
        match self {
            Self::Five => 5,
            Self::Ten => 10,
        }
    }

    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            5 => Some(Self::Five),
            10 => Some(Self::Ten),
            _ => None,
        }
    }
}

impl fmt::Display for SlotCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.len())
    }
}

impl FromStr for SlotCount {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.trim()
            .parse::<usize>()
            .ok()
            .and_then(Self::from_len)
            .ok_or_else(|| format!("slot count must be 5 or 10, got '{raw}'"))
    }
}

/// Builds a slot vector of `count` entries, taking values from `parts` and
/// writing [`EMPTY_SLOT`] for blank or missing positions.
pub fn fill_slots<I, S>(parts: I, count: SlotCount) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut slots: Vec<String> = parts
        .into_iter()
        .take(count.len())
        .map(|part| {
            let value = part.as_ref();
            if value.is_empty() {
                EMPTY_SLOT.to_string()
            } else {
                value.to_string()
            }
        })
        .collect();
    slots.resize(count.len(), EMPTY_SLOT.to_string());
    slots
}

#[cfg(test)]
mod tests {
    use super::{fill_slots, SlotCount};

    #[test]
    fn fill_slots_pads_and_truncates() {
        assert_eq!(
            fill_slots(["a", "", "c"], SlotCount::Five),
            vec!["a", "0", "c", "0", "0"]
        );
        let many: Vec<String> = (0..12).map(|idx| idx.to_string()).collect();
        let slots = fill_slots(&many, SlotCount::Ten);
        assert_eq!(slots.len(), 10);
        assert_eq!(slots[9], "9");
    }

    #[test]
    fn slot_count_parses_only_supported_widths() {
        assert_eq!("5".parse::<SlotCount>(), Ok(SlotCount::Five));
        assert_eq!(" 10 ".parse::<SlotCount>(), Ok(SlotCount::Ten));
        assert!("7".parse::<SlotCount>().is_err());
    }
}

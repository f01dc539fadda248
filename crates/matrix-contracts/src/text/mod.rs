mod chopper;
mod extractor;
mod segmenter;

pub use chopper::{chop, Chopped, NOT_AVAILABLE};
pub use extractor::{extract, CharRule, ExtractMode, Extraction};
pub use segmenter::{bracket_groups, segment, BracketPair, Segmented, BRACKET_STYLES, SEPARATORS};

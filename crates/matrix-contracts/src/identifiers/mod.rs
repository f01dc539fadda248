mod parser;
mod resolver;

pub use parser::{parse_file_stem, parse_identifier, Identifier};
pub use resolver::{has_supported_extension, resolve, resolve_indexed, SUPPORTED_EXTENSIONS};

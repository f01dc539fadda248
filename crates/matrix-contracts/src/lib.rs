pub mod events;
pub mod identifiers;
pub mod nodes;
pub mod slots;
pub mod text;

//! Package-name extraction with deadline-bounded regex searches.

pub mod engine;
pub mod extractor;

pub use engine::{RegexEngine, RegexFlags, RegexMatch, SafeMatches, MAX_INPUT_CHARS};
pub use extractor::{
    default_generic_names, Extraction, PackageExtractor, DEFAULT_GENERIC_NAMES, MAX_ENTITIES,
};

mod assembler;
mod classifier;
mod extractor;
mod loader;
mod normalizer;
mod pipeline;

pub use assembler::{Assembler, Assembly};
pub use classifier::{
    has_roll_rows, has_stat_block, rule_classify, service_subtype, Classifier, ClassifyOutput,
    Fingerprint,
};
pub use extractor::{parse_coord, parse_roll_rows, parse_stat_block, Extraction, Extractor, TableFragment};
pub use loader::{is_placeholder, LoadOutput, RecordLoader, PLACEHOLDER_LITERALS};
pub use normalizer::{
    hex_title_coord, settlement_title_parts, strip_markup, title_hint, Normalizer,
};
pub use pipeline::{IngestPipeline, RunSummary};

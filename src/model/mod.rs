pub mod types;
pub mod transcript;
pub mod gene;

pub use types::{
    CategoryKey, FragmentMatchType, FragmentType, RegionMatchType, TransMatchType,
    GeneId, TranscriptId
};

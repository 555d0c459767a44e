//! splice_quant
//!
//! RNA-seq fragment classification and isoform quantification over a gene model.
//! Reads are mapped onto exon/intron regions of gene collections, classified per
//! transcript, scanned for novel splice junctions and deconvolved into
//! per-transcript abundances. Coordinates are 0-based, half-open.

pub mod types;
pub mod model;
pub mod annotation;
pub mod cache;
pub mod config;
pub mod error;
pub mod alignment;
pub mod reference;
pub mod region;
pub mod mapper;
pub mod classifier;
pub mod junction;
pub mod rates;
pub mod fit;
pub mod state;
pub mod processor;
pub mod output;
pub mod orchestrator;

pub use cache::{AnnotationProvider, GeneModelCache, IdNameKeys};

pub use annotation::AnnotationBuilder;

pub use types::{RefBlock, Strand};

pub use model::transcript::Transcript;
pub use model::gene::Gene;
pub use model::types::{
    CategoryKey, FragmentMatchType, FragmentType, GeneId, RegionMatchType, TransMatchType, TranscriptId,
};

pub use alignment::{AlignmentRecord, AlignmentSource, SamSource};
pub use config::EngineConfig;
pub use error::{QuantError, Result};
pub use junction::{AltSpliceJunction, AltSpliceJunctionFinder, AltSpliceJunctionType};
pub use orchestrator::{Engine, GeneCollection, RunSummary};
pub use output::{CollectionReport, MemorySink, ResultSink, TsvResultWriter};
pub use reference::RefGenome;

//! GTF/GFF3 input and gene-model construction.

pub mod builder;
pub mod io;

pub use builder::AnnotationBuilder;
pub use io::{AnnotationReader, AnnotationRecord, Dialect, ParseError};
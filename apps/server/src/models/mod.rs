//! Domain models for the terminology bridge

pub mod jobs;
pub mod terminology;

pub use jobs::{BatchJob, JobItem, JobItemStatus, JobProgress, JobStatus, ProgressEvent};
pub use terminology::{
    Candidate, Equivalence, Mapping, MappingListRow, MappingSource, MappingStats, RetrievalOrigin,
    SourceCode, SourceSystem, TargetCode, ValidationStatus,
};

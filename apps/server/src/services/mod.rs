//! Service layer

pub mod adjudicator;
pub mod audit;
pub mod embedding;
pub mod fhir;
pub mod jobs;
pub mod mapping;
pub mod pipeline;
pub mod retriever;
pub mod upstream;

pub use audit::AuditService;
pub use fhir::FhirService;
pub use jobs::JobRegistry;
pub use mapping::TranslateService;
pub use pipeline::MappingPipeline;
pub use upstream::WhoApiProbe;

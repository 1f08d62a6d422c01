//! Terminology bridge mapping India's NAMASTE traditional-medicine codes
//! (Ayurveda, Siddha, Unani) to the WHO ICD-11 Traditional Medicine Module 2.
//!
//! The core is a staged pipeline (normalize → embed → candidate retrieval →
//! route by confidence → LLM adjudication → persist) fronted by FHIR R4
//! terminology operations, an asynchronous batch job queue, bounded caches,
//! rate limiting and audit recording.

#![allow(
    clippy::too_many_arguments,      // Domain operations legitimately take many fields
    clippy::large_enum_variant,      // Boxing error variants is not worth the indirection here
)]

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod ratelimit;
pub mod request_context;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{Error, FhirError, Result};
pub use state::AppState;

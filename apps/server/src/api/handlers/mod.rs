//! HTTP handlers

pub mod admin;
pub mod autocomplete;
pub mod batch;
pub mod fhir;
pub mod health;
pub mod mapping;
pub mod metrics;

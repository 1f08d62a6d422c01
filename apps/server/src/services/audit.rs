//! Audit recording
//!
//! Every request except health/metrics probes is captured after the response
//! is produced. Recording is fire-and-forget through a bounded channel; a
//! full or closed channel never delays or fails the request.

use crate::db::audit::{AuditLogRepository, AuditRecord};
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AuditService {
    sender: mpsc::Sender<AuditRecord>,
}

impl AuditService {
    pub fn new(repo: AuditLogRepository) -> Self {
        let (sender, mut receiver) = mpsc::channel::<AuditRecord>(2048);

        tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                if let Err(e) = repo.insert(&record).await {
                    tracing::warn!("Failed to persist audit record: {e}");
                }
            }
        });

        tracing::info!("Audit recording initialized (audit_logs)");
        Self { sender }
    }

    /// Enqueue a record; drops (with a log line) rather than blocking.
    pub fn enqueue(&self, record: AuditRecord) {
        match self.sender.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    if sender.send(record).await.is_err() {
                        tracing::warn!("Audit queue closed; dropping record");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Audit queue closed; dropping record");
            }
        }
    }
}

/// Derive `(action, resource_type)` from the request method and path.
pub fn derive_action(method: &str, path: &str) -> (String, String) {
    let path = path.trim_end_matches('/');

    let (action, resource_type) = if path.starts_with("/mapping/batch") {
        match method {
            "POST" => ("BATCH_TRANSLATE", "ConceptMap"),
            "DELETE" => ("BATCH_CANCEL", "ConceptMap"),
            _ => ("BATCH_STATUS", "ConceptMap"),
        }
    } else if path.starts_with("/mapping") {
        match method {
            "POST" => ("TRANSLATE", "ConceptMap"),
            "PUT" => ("VALIDATE", "ConceptMap"),
            _ => ("LIST_MAPPINGS", "ConceptMap"),
        }
    } else if path.starts_with("/autocomplete") {
        ("SEARCH", "CodeSystem")
    } else if path.starts_with("/fhir/ConceptMap") {
        ("TRANSLATE", "ConceptMap")
    } else if path.starts_with("/fhir/ValueSet") {
        ("EXPAND", "ValueSet")
    } else if path.starts_with("/fhir/CodeSystem") {
        ("LOOKUP", "CodeSystem")
    } else if path.starts_with("/fhir") {
        ("CAPABILITIES", "CapabilityStatement")
    } else if path.starts_with("/admin") {
        ("ADMIN", "System")
    } else {
        ("REQUEST", "System")
    };

    (action.to_string(), resource_type.to_string())
}

/// Health and metrics probes are not audited.
pub fn is_audited_path(path: &str) -> bool {
    let path = path.trim_end_matches('/');
    !(path == "/health" || path.starts_with("/health/") || path == "/metrics" || path.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_derive_from_method_and_path() {
        assert_eq!(
            derive_action("POST", "/mapping"),
            ("TRANSLATE".to_string(), "ConceptMap".to_string())
        );
        assert_eq!(
            derive_action("POST", "/mapping/batch/async"),
            ("BATCH_TRANSLATE".to_string(), "ConceptMap".to_string())
        );
        assert_eq!(
            derive_action("DELETE", "/mapping/batch/abc"),
            ("BATCH_CANCEL".to_string(), "ConceptMap".to_string())
        );
        assert_eq!(
            derive_action("GET", "/mapping"),
            ("LIST_MAPPINGS".to_string(), "ConceptMap".to_string())
        );
        assert_eq!(
            derive_action("POST", "/fhir/ConceptMap/$translate"),
            ("TRANSLATE".to_string(), "ConceptMap".to_string())
        );
        assert_eq!(
            derive_action("GET", "/fhir/ValueSet/$expand"),
            ("EXPAND".to_string(), "ValueSet".to_string())
        );
        assert_eq!(
            derive_action("GET", "/fhir/CodeSystem/$lookup"),
            ("LOOKUP".to_string(), "CodeSystem".to_string())
        );
    }

    #[test]
    fn probes_are_not_audited() {
        assert!(!is_audited_path("/health"));
        assert!(!is_audited_path("/health/ready"));
        assert!(!is_audited_path("/metrics"));
        assert!(is_audited_path("/mapping"));
        assert!(is_audited_path("/fhir/metadata"));
    }
}

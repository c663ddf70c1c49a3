//! Resolution output: merged data plus a report of how it was obtained.

use std::time::Duration;

use ngsild_model::{AttributeObservation, MergedAttribute, MergedEntity, Origin, SourceStatus};
use serde::Serialize;

/// Why a source did not contribute fully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WarningKind {
    /// Registry could not be read; the query ran local-only
    RegistryUnavailable,
    Unreachable,
    Timeout,
    /// Source answered with an error status or a malformed body
    RemoteError,
    /// Source answered but part of the body was unusable
    PartialResponse,
}

/// Non-fatal problem encountered while resolving a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceWarning {
    /// Registration id; `None` for registry-level warnings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub kind: WarningKind,
    pub message: String,
}

impl SourceWarning {
    pub fn registry_unavailable(message: impl Into<String>) -> Self {
        Self {
            source: None,
            kind: WarningKind::RegistryUnavailable,
            message: message.into(),
        }
    }

    pub fn for_source(source: impl Into<String>, kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            kind,
            message: message.into(),
        }
    }
}

/// Per-source dispatch summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub origin: Origin,
    pub status: SourceStatus,
    pub results: usize,
    pub latency: Duration,
}

/// How a query was resolved.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveReport {
    /// Every dispatched source, local first, then in match order
    pub sources: Vec<SourceReport>,
    pub warnings: Vec<SourceWarning>,
    pub local_queried: bool,
    /// Registrations selected by the matcher
    pub matched_sources: usize,
    pub type_conflicts: usize,
    pub elapsed: Duration,
}

impl ResolveReport {
    /// Whether every selected source answered in full.
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Sources whose data was merged.
    pub fn contributors(&self) -> Vec<&Origin> {
        self.sources
            .iter()
            .filter(|s| s.status == SourceStatus::Ok)
            .map(|s| &s.origin)
            .collect()
    }

    /// Warnings of one kind.
    pub fn warnings_of(&self, kind: WarningKind) -> Vec<&SourceWarning> {
        self.warnings.iter().filter(|w| w.kind == kind).collect()
    }

    pub fn status_of(&self, origin: &Origin) -> Option<SourceStatus> {
        self.sources
            .iter()
            .find(|s| &s.origin == origin)
            .map(|s| s.status)
    }
}

/// Result of `resolve`.
///
/// Temporal queries yield entities whose attributes are observation series.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub entities: Vec<MergedEntity>,
    pub report: ResolveReport,
}

impl Resolution {
    /// Every observation, grouped by entity and attribute, each series in time order.
    pub fn observations(&self) -> Vec<&AttributeObservation> {
        self.entities
            .iter()
            .flat_map(|e| e.attributes.values())
            .filter_map(|a| match a {
                MergedAttribute::Series { observations } => Some(observations.iter()),
                MergedAttribute::Value { .. } => None,
            })
            .flatten()
            .collect()
    }

    pub fn entity(&self, id: &str) -> Option<&MergedEntity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_completeness() {
        let mut report = ResolveReport {
            sources: vec![
                SourceReport {
                    origin: Origin::Local,
                    status: SourceStatus::Ok,
                    results: 2,
                    latency: Duration::from_millis(3),
                },
                SourceReport {
                    origin: Origin::registration("urn:csr:a"),
                    status: SourceStatus::Timeout,
                    results: 0,
                    latency: Duration::from_millis(100),
                },
            ],
            ..Default::default()
        };
        assert!(report.is_complete());
        assert_eq!(report.contributors(), vec![&Origin::Local]);

        report.warnings.push(SourceWarning::for_source(
            "urn:csr:a",
            WarningKind::Timeout,
            "no answer before deadline",
        ));
        assert!(!report.is_complete());
        assert_eq!(report.warnings_of(WarningKind::Timeout).len(), 1);
        assert_eq!(
            report.status_of(&Origin::registration("urn:csr:a")),
            Some(SourceStatus::Timeout)
        );
    }
}

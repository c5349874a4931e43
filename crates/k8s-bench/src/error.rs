//! Error types shared by every orchestration operation.
//!
//! Every failure an operation can produce maps onto an HTTP-style status code
//! and a JSON body, so callers never see a raw cluster exception.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::error;

/// Placeholder reported for a required value that is absent.
pub const NOT_SET: &str = "NOT_SET";

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by orchestration operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Required settings or call parameters are missing.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// The Kubernetes API rejected or failed a request.
    #[error(transparent)]
    Cluster(#[from] ClusterFailure),

    /// No usable cluster or settings configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Manifest or document conversion failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// HTTP-style status code for this failure.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Precondition(err) => err.kind().status_code(),
            Self::Cluster(failure) => failure.status(),
            Self::Configuration(_) | Self::Serialization(_) => 500,
        }
    }

    /// JSON body returned to the caller.
    #[must_use]
    pub fn body(&self) -> Value {
        match self {
            Self::Precondition(err) => err.body(),
            Self::Cluster(failure) => failure.body(),
            Self::Configuration(_) | Self::Serialization(_) => json!({ "error": self.to_string() }),
        }
    }
}

/// Which side of the call is missing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionKind {
    /// The caller omitted required parameters (400).
    MissingParams,
    /// The bench settings lack required fields (501).
    MissingSettings,
}

impl PreconditionKind {
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::MissingParams => 400,
            Self::MissingSettings => 501,
        }
    }
}

/// Report of every value an operation checked, absent ones as [`NOT_SET`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("required values not set: {}", self.missing().join(", "))]
pub struct PreconditionError {
    kind: PreconditionKind,
    report: BTreeMap<&'static str, String>,
}

impl PreconditionError {
    /// Check a set of named values; fails when any of them is absent or blank.
    ///
    /// The report carries every checked value so the caller can see what was
    /// configured alongside what was not.
    pub fn check<'a, I>(kind: PreconditionKind, values: I) -> Result<(), Self>
    where
        I: IntoIterator<Item = (&'static str, Option<&'a str>)>,
    {
        let mut report = BTreeMap::new();
        let mut complete = true;

        for (name, value) in values {
            match value.map(str::trim).filter(|v| !v.is_empty()) {
                Some(v) => {
                    report.insert(name, v.to_string());
                }
                None => {
                    complete = false;
                    report.insert(name, NOT_SET.to_string());
                }
            }
        }

        if complete {
            Ok(())
        } else {
            Err(Self { kind, report })
        }
    }

    #[must_use]
    pub const fn kind(&self) -> PreconditionKind {
        self.kind
    }

    #[must_use]
    pub fn report(&self) -> &BTreeMap<&'static str, String> {
        &self.report
    }

    /// Names of the values reported as [`NOT_SET`].
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        self.report
            .iter()
            .filter(|(_, value)| value.as_str() == NOT_SET)
            .map(|(name, _)| *name)
            .collect()
    }

    #[must_use]
    pub fn body(&self) -> Value {
        json!(self.report)
    }
}

/// A translated Kubernetes API failure: `{error, params, reason?}` plus status.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{operation} failed with status {status}: {error}")]
pub struct ClusterFailure {
    pub(crate) operation: &'static str,
    pub(crate) status: u16,
    pub(crate) error: String,
    pub(crate) reason: Option<String>,
    pub(crate) params: Value,
}

impl ClusterFailure {
    /// Name of the cluster call that failed, used as the log category.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        self.operation
    }

    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    #[must_use]
    pub fn body(&self) -> Value {
        let mut body = json!({
            "error": self.error,
            "params": self.params,
        });
        if let Some(reason) = &self.reason {
            body["reason"] = json!(reason);
        }
        body
    }

    /// Record the failure for later diagnosis.
    pub(crate) fn log(&self) {
        error!(
            category = self.operation,
            status = self.status,
            payload = %self.body(),
            "Kubernetes API call failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_when_all_values_present() {
        let result = PreconditionError::check(
            PreconditionKind::MissingSettings,
            [("namespace", Some("ns1")), ("pvc_name", Some("sites"))],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn check_reports_every_value_with_placeholders() {
        let err = PreconditionError::check(
            PreconditionKind::MissingParams,
            [("site_name", Some("acme")), ("base_pvc_name", Some("  "))],
        )
        .unwrap_err();

        assert_eq!(err.kind().status_code(), 400);
        assert_eq!(err.report().get("site_name").map(String::as_str), Some("acme"));
        assert_eq!(err.report().get("base_pvc_name").map(String::as_str), Some(NOT_SET));
        assert_eq!(err.missing(), vec!["base_pvc_name"]);
    }

    #[test]
    fn error_status_codes_follow_variant() {
        let precondition: Error = PreconditionError::check(
            PreconditionKind::MissingSettings,
            [("namespace", None)],
        )
        .unwrap_err()
        .into();
        assert_eq!(precondition.status_code(), 501);
        assert_eq!(precondition.body(), json!({ "namespace": NOT_SET }));

        let config = Error::Configuration("no kubeconfig".to_string());
        assert_eq!(config.status_code(), 500);
        assert!(config.body()["error"]
            .as_str()
            .unwrap()
            .contains("no kubeconfig"));
    }

    #[test]
    fn cluster_failure_body_omits_empty_reason() {
        let failure = ClusterFailure {
            operation: "read_namespaced_ingress",
            status: 500,
            error: "connection refused".to_string(),
            reason: None,
            params: json!({ "site_name": "acme" }),
        };
        let body = failure.body();
        assert_eq!(body["params"]["site_name"], "acme");
        assert!(body.get("reason").is_none());
    }
}

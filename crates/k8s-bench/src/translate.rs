//! Result translation
//!
//! Turns typed cluster responses into plain JSON documents and cluster errors
//! into [`ClusterFailure`] values with a uniform `{error, params, reason?}`
//! shape.

use crate::cluster::Removed;
use crate::error::{ClusterFailure, Result};
use k8s_openapi::api::{batch::v1::Job, core::v1::ConfigMap, networking::v1::Ingress};
use kube::core::response::Status;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Status reported when the cluster gives none.
const FALLBACK_STATUS: u16 = 500;

/// Kinds of documents this crate hands back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Job,
    Ingress,
    ConfigMap,
    Status,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Job => "Job",
            Self::Ingress => "Ingress",
            Self::ConfigMap => "ConfigMap",
            Self::Status => "Status",
        };
        f.write_str(name)
    }
}

/// Conversion of a typed cluster response into a plain document.
pub trait ToDocument {
    const KIND: ResourceKind;

    fn to_document(&self) -> Result<Value>;
}

impl ToDocument for Job {
    const KIND: ResourceKind = ResourceKind::Job;

    fn to_document(&self) -> Result<Value> {
        object_document(Self::KIND, self)
    }
}

impl ToDocument for Ingress {
    const KIND: ResourceKind = ResourceKind::Ingress;

    fn to_document(&self) -> Result<Value> {
        object_document(Self::KIND, self)
    }
}

impl ToDocument for ConfigMap {
    const KIND: ResourceKind = ResourceKind::ConfigMap;

    fn to_document(&self) -> Result<Value> {
        object_document(Self::KIND, self)
    }
}

impl ToDocument for Status {
    const KIND: ResourceKind = ResourceKind::Status;

    fn to_document(&self) -> Result<Value> {
        debug!(kind = %Self::KIND, "Rendering cluster document");
        Ok(serde_json::to_value(self)?)
    }
}

impl<K: ToDocument> ToDocument for Removed<K> {
    const KIND: ResourceKind = K::KIND;

    fn to_document(&self) -> Result<Value> {
        match self {
            Self::Object(object) => object.to_document(),
            Self::Status(status) => status.to_document(),
        }
    }
}

/// Serialize a Kubernetes object. Timestamps render as RFC 3339 strings and
/// server-side apply bookkeeping is dropped.
fn object_document<T: Serialize>(kind: ResourceKind, object: &T) -> Result<Value> {
    debug!(%kind, "Rendering cluster document");
    let mut document = serde_json::to_value(object)?;
    if let Some(metadata) = document.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove("managedFields");
    }
    Ok(document)
}

/// Translate and log a failed API call.
pub(crate) fn api_failure(
    operation: &'static str,
    err: &kube::Error,
    params: Value,
) -> ClusterFailure {
    let failure = ClusterFailure::from_kube(operation, err, params);
    failure.log();
    failure
}

impl ClusterFailure {
    /// Translate a client error raised by `operation`.
    ///
    /// API responses keep the server's status code and reason; transport or
    /// client-side failures fall back to 500 without a reason.
    #[must_use]
    pub fn from_kube(operation: &'static str, err: &kube::Error, params: Value) -> Self {
        let (status, reason) = match err {
            kube::Error::Api(response) => (
                if response.code == 0 {
                    FALLBACK_STATUS
                } else {
                    response.code
                },
                Some(response.reason.clone()).filter(|r| !r.is_empty()),
            ),
            _ => (FALLBACK_STATUS, None),
        };

        Self {
            operation,
            status,
            error: err.to_string(),
            reason,
            params,
        }
    }

    /// Translate a failure that happened before any API call could be made.
    #[must_use]
    pub fn unavailable(operation: &'static str, err: &crate::Error, params: Value) -> Self {
        Self {
            operation,
            status: FALLBACK_STATUS,
            error: err.to_string(),
            reason: None,
            params,
        }
    }
}

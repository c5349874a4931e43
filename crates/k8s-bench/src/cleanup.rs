//! Site teardown
//!
//! Deletes a site's Ingress and upgrade Job independently. One resource being
//! already gone must not stop the other from being removed, so each outcome
//! is recorded under its own key and the call as a whole is always accepted.

use crate::cluster::{connect_for, ClusterConnector};
use crate::error::{ClusterFailure, Result};
use crate::ingress::delete_ingress;
use crate::jobs::delete_upgrade_job;
use crate::settings::BenchSettings;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

pub const ACCEPTED: &str = "Accepted";

/// Outcome of [`delete_site_resources`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_deleted: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_delete_error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_job_deleted: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_delete_error: Option<Value>,
}

impl CleanupReport {
    fn accepted() -> Self {
        Self {
            status: ACCEPTED,
            ingress_deleted: None,
            ingress_delete_error: None,
            upgrade_job_deleted: None,
            job_delete_error: None,
        }
    }

    fn record_ingress(&mut self, outcome: Result<Value, ClusterFailure>) {
        match outcome {
            Ok(document) => self.ingress_deleted = Some(document),
            Err(failure) => self.ingress_delete_error = Some(failure.body()),
        }
    }

    fn record_job(&mut self, outcome: Result<Value, ClusterFailure>) {
        match outcome {
            Ok(document) => self.upgrade_job_deleted = Some(document),
            Err(failure) => self.job_delete_error = Some(failure.body()),
        }
    }

    /// True when both deletions succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.ingress_delete_error.is_none() && self.job_delete_error.is_none()
    }
}

/// Delete the Ingress and then the upgrade Job for `site`.
///
/// Only a missing namespace fails the call (501); cluster failures are
/// reported inside the returned [`CleanupReport`].
#[instrument(skip(connector, settings))]
pub async fn delete_site_resources(
    connector: &dyn ClusterConnector,
    settings: &BenchSettings,
    site: &str,
) -> Result<CleanupReport> {
    const OPERATION: &str = "delete_site_resources";

    let namespace = settings.namespace()?;
    let mut report = CleanupReport::accepted();

    let params = json!({ "site_name": site });
    match connect_for(connector, OPERATION, &params).await {
        Ok(cluster) => {
            report.record_ingress(delete_ingress(cluster.as_ref(), namespace, site).await);
            report.record_job(delete_upgrade_job(cluster.as_ref(), namespace, site).await);
        }
        Err(failure) => {
            report.record_ingress(Err(failure.clone()));
            report.record_job(Err(failure));
        }
    }

    if report.is_complete() {
        info!(site, namespace, "Deleted site resources");
    } else {
        warn!(
            site,
            namespace,
            ingress_failed = report.ingress_delete_error.is_some(),
            job_failed = report.job_delete_error.is_some(),
            "Site cleanup finished with failures"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MockClusterApi, MockClusterConnector, Removed};
    use crate::error::{Error, NOT_SET};
    use crate::testing::{api_error, connector_for, full_settings, unreachable_connector};
    use k8s_openapi::api::batch::v1::Job;
    use kube::core::response::Status;

    fn success_status() -> Status {
        serde_json::from_value(json!({ "status": "Success", "code": 200 })).unwrap()
    }

    #[tokio::test]
    async fn deletes_both_resources() {
        let mut api = MockClusterApi::new();
        let mut sequence = mockall::Sequence::new();
        api.expect_delete_ingress()
            .withf(|namespace, name| namespace == "ns1" && name == "acme")
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(Removed::Status(success_status())));
        api.expect_delete_job()
            .withf(|namespace, name| namespace == "ns1" && name == "upgrade-site-acme")
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, name| {
                let mut job = Job::default();
                job.metadata.name = Some(name.to_string());
                Ok(Removed::Object(job))
            });
        let connector = connector_for(api);

        let report = delete_site_resources(&connector, &full_settings(), "acme")
            .await
            .unwrap();
        assert!(report.is_complete());

        let body = serde_json::to_value(&report).unwrap();
        assert_eq!(body["status"], ACCEPTED);
        assert_eq!(body["ingress_deleted"]["code"], 200);
        assert_eq!(body["upgrade_job_deleted"]["metadata"]["name"], "upgrade-site-acme");
        assert!(body.get("ingress_delete_error").is_none());
        assert!(body.get("job_delete_error").is_none());
    }

    #[tokio::test]
    async fn both_failures_are_captured_and_accepted() {
        let mut api = MockClusterApi::new();
        api.expect_delete_ingress()
            .times(1)
            .returning(|_, _| Err(api_error(404, "NotFound")));
        api.expect_delete_job()
            .times(1)
            .returning(|_, _| Err(api_error(403, "Forbidden")));
        let connector = connector_for(api);

        let report = delete_site_resources(&connector, &full_settings(), "acme")
            .await
            .unwrap();
        assert!(!report.is_complete());

        let body = serde_json::to_value(&report).unwrap();
        assert_eq!(body["status"], ACCEPTED);
        assert_eq!(body["ingress_delete_error"]["reason"], "NotFound");
        assert_eq!(body["ingress_delete_error"]["params"]["site_name"], "acme");
        assert_eq!(body["job_delete_error"]["reason"], "Forbidden");
        assert!(body.get("ingress_deleted").is_none());
        assert!(body.get("upgrade_job_deleted").is_none());
    }

    #[tokio::test]
    async fn ingress_failure_does_not_stop_job_delete() {
        let mut api = MockClusterApi::new();
        api.expect_delete_ingress()
            .returning(|_, _| Err(api_error(404, "NotFound")));
        api.expect_delete_job()
            .times(1)
            .returning(|_, _| Ok(Removed::Status(success_status())));
        let connector = connector_for(api);

        let report = delete_site_resources(&connector, &full_settings(), "acme")
            .await
            .unwrap();
        assert!(report.ingress_delete_error.is_some());
        assert!(report.upgrade_job_deleted.is_some());
    }

    #[tokio::test]
    async fn unreachable_cluster_fills_both_errors() {
        let mut connector = MockClusterConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|| Err(Error::Configuration("no kubeconfig".to_string())));

        let report = delete_site_resources(&connector, &full_settings(), "acme")
            .await
            .unwrap();
        assert_eq!(report.status, ACCEPTED);
        assert_eq!(report.ingress_delete_error, report.job_delete_error);
        assert!(report.job_delete_error.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("no kubeconfig"));
    }

    #[tokio::test]
    async fn missing_namespace_is_501() {
        let err = delete_site_resources(&unreachable_connector(), &BenchSettings::default(), "acme")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 501);
        assert_eq!(err.body(), json!({ "namespace": NOT_SET }));
    }
}

//! Upgrade Job orchestration
//!
//! Jobs move through Absent → Submitted → {Succeeded | Failed}. Submission
//! returns as soon as the API server accepts the Job; progress is observed
//! through [`get_status`].
//!
//! There is no local duplicate-submission guard. Job names are derived from
//! the site, so a second submission for the same site is rejected by the API
//! server with a 409 `AlreadyExists`, which is reported like any other API
//! failure.

use crate::cluster::{connect_for, ClusterApi, ClusterConnector, Removed};
use crate::error::{ClusterFailure, Result};
use crate::manifest::{build_upgrade_job, upgrade_job_name};
use crate::settings::BenchSettings;
use crate::translate::{api_failure, ToDocument};
use k8s_openapi::api::batch::v1::Job;
use serde_json::{json, Value};
use std::fmt;
use tracing::{info, instrument};

/// Observed lifecycle phase of a submitted Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Submitted,
    Succeeded,
    Failed,
}

impl JobPhase {
    /// Derive the phase from a Job's status, preferring terminal conditions
    /// over pod counters.
    #[must_use]
    pub fn of(job: &Job) -> Self {
        let Some(status) = job.status.as_ref() else {
            return Self::Submitted;
        };

        let condition_true = |kind: &str| {
            status.conditions.as_ref().is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == kind && c.status.eq_ignore_ascii_case("true"))
            })
        };

        if condition_true("Complete") {
            Self::Succeeded
        } else if condition_true("Failed") {
            Self::Failed
        } else if status.succeeded.unwrap_or(0) > 0 {
            Self::Succeeded
        } else if status.failed.unwrap_or(0) > 0 {
            Self::Failed
        } else {
            Self::Submitted
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submitted => "Submitted",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Submit the upgrade Job for `site`. Returns `"<job-name> created"`.
#[instrument(skip(connector, settings))]
pub async fn create_upgrade_job(
    connector: &dyn ClusterConnector,
    settings: &BenchSettings,
    site: &str,
    base_pvc_name: &str,
) -> Result<Value> {
    const OPERATION: &str = "create_namespaced_job";

    let job = build_upgrade_job(settings, site, base_pvc_name)?;
    let job_name = upgrade_job_name(site);
    let namespace = settings.namespace()?;
    let params = json!({ "site_name": site, "base_pvc_name": base_pvc_name });

    let cluster = connect_for(connector, OPERATION, &params).await?;
    match cluster.create_job(namespace, &job).await {
        Ok(_) => {
            info!(job = %job_name, namespace, "Submitted upgrade Job");
            Ok(json!(format!("{job_name} created")))
        }
        Err(err) => Err(api_failure(OPERATION, &err, params).into()),
    }
}

/// Read the current status document of `job_name`.
#[instrument(skip(connector, settings))]
pub async fn get_status(
    connector: &dyn ClusterConnector,
    settings: &BenchSettings,
    job_name: &str,
) -> Result<Value> {
    const OPERATION: &str = "read_namespaced_job_status";

    let namespace = settings.namespace()?;
    let params = json!({ "job_name": job_name, "namespace": namespace });

    let cluster = connect_for(connector, OPERATION, &params).await?;
    match cluster.read_job_status(namespace, job_name).await {
        Ok(job) => {
            info!(job = job_name, phase = %JobPhase::of(&job), "Read Job status");
            job.to_document()
        }
        Err(err) => Err(api_failure(OPERATION, &err, params).into()),
    }
}

/// Delete the upgrade Job for `site`. Failures come back as values so
/// cleanup can carry on.
pub async fn delete_upgrade_job(
    cluster: &dyn ClusterApi,
    namespace: &str,
    site: &str,
) -> Result<Value, ClusterFailure> {
    const OPERATION: &str = "delete_namespaced_job";

    let params = json!({ "site_name": site });
    let removed: Removed<Job> = cluster
        .delete_job(namespace, &upgrade_job_name(site))
        .await
        .map_err(|err| api_failure(OPERATION, &err, params.clone()))?;

    removed
        .to_document()
        .map_err(|err| ClusterFailure::unavailable(OPERATION, &err, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::error::{Error, NOT_SET};
    use crate::testing::{api_error, connector_for, full_settings, unreachable_connector};
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};

    fn job_settings() -> BenchSettings {
        BenchSettings {
            namespace: Some("ns1".to_string()),
            nginx_image: Some("nginx:1".to_string()),
            python_image: Some("py:1".to_string()),
            pvc_name: Some("sites-pvc".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_submits_rendered_job() {
        let mut api = MockClusterApi::new();
        api.expect_create_job()
            .withf(|namespace, job| {
                namespace == "ns1" && job.metadata.name.as_deref() == Some("upgrade-site-acme")
            })
            .times(1)
            .returning(|_, job| Ok(job.clone()));
        let connector = connector_for(api);

        let result = create_upgrade_job(&connector, &job_settings(), "acme", "base-pvc")
            .await
            .unwrap();
        assert_eq!(result, json!("upgrade-site-acme created"));
    }

    #[tokio::test]
    async fn create_without_params_is_400_and_never_connects() {
        let err = create_upgrade_job(&unreachable_connector(), &job_settings(), "acme", "")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.body()["base_pvc_name"], NOT_SET);
        assert_eq!(err.body()["site_name"], "acme");
    }

    #[tokio::test]
    async fn create_without_settings_is_501_and_never_connects() {
        let err = create_upgrade_job(
            &unreachable_connector(),
            &BenchSettings::default(),
            "acme",
            "base-pvc",
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 501);
        let body = err.body();
        for field in ["namespace", "nginx_image", "python_image", "pvc_name"] {
            assert_eq!(body[field], NOT_SET);
        }
    }

    #[tokio::test]
    async fn duplicate_submission_surfaces_conflict() {
        let mut api = MockClusterApi::new();
        api.expect_create_job()
            .returning(|_, _| Err(api_error(409, "AlreadyExists")));
        let connector = connector_for(api);

        let err = create_upgrade_job(&connector, &job_settings(), "acme", "base-pvc")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
        let body = err.body();
        assert_eq!(body["reason"], "AlreadyExists");
        assert_eq!(body["params"]["site_name"], "acme");
        assert_eq!(body["params"]["base_pvc_name"], "base-pvc");
    }

    #[tokio::test]
    async fn connection_failure_is_translated_to_500() {
        let mut connector = crate::cluster::MockClusterConnector::new();
        connector
            .expect_connect()
            .returning(|| Err(Error::Configuration("no service account".to_string())));

        let err = create_upgrade_job(&connector, &job_settings(), "acme", "base-pvc")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(err.body()["error"]
            .as_str()
            .unwrap()
            .contains("no service account"));
    }

    #[tokio::test]
    async fn status_requires_namespace() {
        let err = get_status(
            &unreachable_connector(),
            &BenchSettings::default(),
            "upgrade-site-acme",
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 501);
        assert_eq!(err.body(), json!({ "namespace": NOT_SET }));
    }

    #[tokio::test]
    async fn status_not_found_carries_reason() {
        let mut api = MockClusterApi::new();
        api.expect_read_job_status()
            .withf(|namespace, name| namespace == "ns1" && name == "upgrade-site-acme")
            .returning(|_, _| Err(api_error(404, "NotFound")));
        let connector = connector_for(api);

        let err = get_status(&connector, &full_settings(), "upgrade-site-acme")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cluster(_)));
        assert_eq!(err.status_code(), 404);
        let body = err.body();
        assert_eq!(body["reason"], "NotFound");
        assert_eq!(body["params"]["job_name"], "upgrade-site-acme");
        assert_eq!(body["params"]["namespace"], "ns1");
    }

    #[tokio::test]
    async fn status_returns_document() {
        let mut api = MockClusterApi::new();
        api.expect_read_job_status().returning(|_, name| {
            let mut job = Job::default();
            job.metadata.name = Some(name.to_string());
            job.status = Some(JobStatus {
                active: Some(1),
                ..Default::default()
            });
            Ok(job)
        });
        let connector = connector_for(api);

        let document = get_status(&connector, &full_settings(), "upgrade-site-acme")
            .await
            .unwrap();
        assert_eq!(document["metadata"]["name"], "upgrade-site-acme");
        assert_eq!(document["status"]["active"], 1);
    }

    #[test]
    fn phase_follows_conditions_then_counters() {
        let mut job = Job::default();
        assert_eq!(JobPhase::of(&job), JobPhase::Submitted);

        job.status = Some(JobStatus {
            failed: Some(1),
            ..Default::default()
        });
        assert_eq!(JobPhase::of(&job), JobPhase::Failed);

        job.status = Some(JobStatus {
            failed: Some(1),
            conditions: Some(vec![JobCondition {
                type_: "Complete".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        let phase = JobPhase::of(&job);
        assert_eq!(phase, JobPhase::Succeeded);
        assert!(phase.is_terminal());
        assert!(!JobPhase::Submitted.is_terminal());
    }

    #[tokio::test]
    async fn delete_reports_failure_as_value() {
        let mut api = MockClusterApi::new();
        api.expect_delete_job()
            .withf(|namespace, name| namespace == "ns1" && name == "upgrade-site-acme")
            .returning(|_, _| Err(api_error(404, "NotFound")));

        let failure = delete_upgrade_job(&api, "ns1", "acme")
            .await
            .unwrap_err();
        assert_eq!(failure.status(), 404);
        assert_eq!(failure.body()["params"]["site_name"], "acme");
    }
}

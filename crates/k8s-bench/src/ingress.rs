//! Site Ingress orchestration

use crate::cluster::{connect_for, ClusterApi, ClusterConnector, Removed};
use crate::error::{ClusterFailure, Result};
use crate::manifest::build_ingress;
use crate::settings::{BenchSettings, SettingField};
use crate::translate::{api_failure, ToDocument};
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::{json, Value};
use tracing::{info, instrument};

/// Create the Ingress for `site` and return the created resource.
#[instrument(skip(connector, settings))]
pub async fn create_ingress(
    connector: &dyn ClusterConnector,
    settings: &BenchSettings,
    site: &str,
) -> Result<Value> {
    const OPERATION: &str = "create_namespaced_ingress";

    let ingress = build_ingress(settings, site)?;
    let namespace = settings.namespace()?;
    let params = json!({ "site_name": site });

    let cluster = connect_for(connector, OPERATION, &params).await?;
    match cluster.create_ingress(namespace, &ingress).await {
        Ok(created) => {
            info!(ingress = site, namespace, "Created site Ingress");
            created.to_document()
        }
        Err(err) => Err(api_failure(OPERATION, &err, params).into()),
    }
}

/// Fetch the current Ingress for `site`.
#[instrument(skip(connector, settings))]
pub async fn read_ingress(
    connector: &dyn ClusterConnector,
    settings: &BenchSettings,
    site: &str,
) -> Result<Value> {
    const OPERATION: &str = "read_namespaced_ingress";

    let namespace = settings.namespace()?;
    let params = json!({ "site_name": site, "namespace": namespace });

    let cluster = connect_for(connector, OPERATION, &params).await?;
    match cluster.read_ingress(namespace, site).await {
        Ok(ingress) => ingress.to_document(),
        Err(err) => Err(api_failure(OPERATION, &err, params).into()),
    }
}

/// Point the site's Ingress at the currently configured bench service.
///
/// Only the first path of the first rule is rewired. An Ingress without
/// rules or paths is returned unchanged and is not patched. The read and the
/// patch are not atomic; the patch carries the `resourceVersion` that was
/// read, so a concurrent modification comes back as a 409.
#[instrument(skip(connector, settings))]
pub async fn repoint_ingress(
    connector: &dyn ClusterConnector,
    settings: &BenchSettings,
    site: &str,
) -> Result<Value> {
    const OPERATION: &str = "patch_namespaced_ingress";

    settings.require(&[SettingField::Namespace, SettingField::ServiceName])?;
    let namespace = settings.namespace()?;
    let service_name = settings.get(SettingField::ServiceName).unwrap_or_default();
    let params = json!({ "site_name": site });

    let cluster = connect_for(connector, OPERATION, &params).await?;
    let mut ingress = cluster
        .read_ingress(namespace, site)
        .await
        .map_err(|err| api_failure(OPERATION, &err, params.clone()))?;

    if !rewire_first_backend(&mut ingress, service_name) {
        info!(ingress = site, "Ingress has no rule paths, leaving it untouched");
        return ingress.to_document();
    }

    match cluster.patch_ingress(namespace, site, &ingress).await {
        Ok(patched) => {
            info!(ingress = site, service = service_name, "Repointed site Ingress");
            patched.to_document()
        }
        Err(err) => Err(api_failure(OPERATION, &err, params).into()),
    }
}

/// Delete the Ingress for `site`. Failures come back as values so cleanup can
/// carry on.
pub async fn delete_ingress(
    cluster: &dyn ClusterApi,
    namespace: &str,
    site: &str,
) -> Result<Value, ClusterFailure> {
    const OPERATION: &str = "delete_namespaced_ingress";

    let params = json!({ "site_name": site });
    let removed: Removed<Ingress> = cluster
        .delete_ingress(namespace, site)
        .await
        .map_err(|err| api_failure(OPERATION, &err, params.clone()))?;

    removed
        .to_document()
        .map_err(|err| ClusterFailure::unavailable(OPERATION, &err, params))
}

/// Set the service of the first path of the first rule. Returns false when
/// there is no such path.
fn rewire_first_backend(ingress: &mut Ingress, service_name: &str) -> bool {
    let Some(path) = ingress
        .spec
        .as_mut()
        .and_then(|spec| spec.rules.as_mut())
        .and_then(|rules| rules.first_mut())
        .and_then(|rule| rule.http.as_mut())
        .and_then(|http| http.paths.first_mut())
    else {
        return false;
    };

    let backend = path.backend.service.get_or_insert_with(Default::default);
    backend.name = service_name.to_string();
    true
}

//! Upgrade script publishing
//!
//! The migration program run by upgrade Jobs is opaque to this crate. It is
//! shipped as the `upgrade-site` ConfigMap, which every Job mounts read-only.

use crate::cluster::{connect_for, ClusterConnector};
use crate::error::Result;
use crate::manifest::{build_upgrade_script_config_map, UPGRADE_SITE};
use crate::settings::BenchSettings;
use crate::translate::{api_failure, ToDocument};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

/// Create or replace the upgrade script ConfigMap and return it.
#[instrument(skip(connector, settings, script), fields(script_len = script.len()))]
pub async fn install_upgrade_script(
    connector: &dyn ClusterConnector,
    settings: &BenchSettings,
    script: &str,
) -> Result<Value> {
    const OPERATION: &str = "create_namespaced_config_map";
    const REPLACE_OPERATION: &str = "replace_namespaced_config_map";

    let config_map = build_upgrade_script_config_map(settings, script)?;
    let namespace = settings.namespace()?;
    let params = json!({ "name": UPGRADE_SITE, "namespace": namespace });

    let cluster = connect_for(connector, OPERATION, &params).await?;
    match cluster.create_config_map(namespace, &config_map).await {
        Ok(created) => {
            info!(config_map = UPGRADE_SITE, namespace, "Installed upgrade script");
            created.to_document()
        }
        Err(kube::Error::Api(response)) if response.code == 409 => {
            debug!(config_map = UPGRADE_SITE, "Upgrade script exists, replacing it");
            match cluster
                .replace_config_map(namespace, UPGRADE_SITE, &config_map)
                .await
            {
                Ok(replaced) => {
                    info!(config_map = UPGRADE_SITE, namespace, "Replaced upgrade script");
                    replaced.to_document()
                }
                Err(err) => Err(api_failure(REPLACE_OPERATION, &err, params).into()),
            }
        }
        Err(err) => Err(api_failure(OPERATION, &err, params).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::error::NOT_SET;
    use crate::manifest::UPGRADE_SCRIPT_KEY;
    use crate::testing::{api_error, connector_for, full_settings, unreachable_connector};

    const SCRIPT: &str = "print('migrating')\n";

    #[tokio::test]
    async fn creates_config_map() {
        let mut api = MockClusterApi::new();
        api.expect_create_config_map()
            .withf(|namespace, config_map| {
                namespace == "ns1"
                    && config_map
                        .data
                        .as_ref()
                        .and_then(|data| data.get(UPGRADE_SCRIPT_KEY))
                        .is_some_and(|script| script == SCRIPT)
            })
            .times(1)
            .returning(|_, config_map| Ok(config_map.clone()));
        api.expect_replace_config_map().never();
        let connector = connector_for(api);

        let document = install_upgrade_script(&connector, &full_settings(), SCRIPT)
            .await
            .unwrap();
        assert_eq!(document["metadata"]["name"], UPGRADE_SITE);
        assert_eq!(document["data"][UPGRADE_SCRIPT_KEY], SCRIPT);
    }

    #[tokio::test]
    async fn existing_config_map_is_replaced() {
        let mut api = MockClusterApi::new();
        api.expect_create_config_map()
            .times(1)
            .returning(|_, _| Err(api_error(409, "AlreadyExists")));
        api.expect_replace_config_map()
            .withf(|namespace, name, _| namespace == "ns1" && name == UPGRADE_SITE)
            .times(1)
            .returning(|_, _, config_map| {
                let mut replaced = config_map.clone();
                replaced.metadata.resource_version = Some("7".to_string());
                Ok(replaced)
            });
        let connector = connector_for(api);

        let document = install_upgrade_script(&connector, &full_settings(), SCRIPT)
            .await
            .unwrap();
        assert_eq!(document["metadata"]["resourceVersion"], "7");
    }

    #[tokio::test]
    async fn replace_failure_is_translated() {
        let mut api = MockClusterApi::new();
        api.expect_create_config_map()
            .returning(|_, _| Err(api_error(409, "AlreadyExists")));
        api.expect_replace_config_map()
            .returning(|_, _, _| Err(api_error(403, "Forbidden")));
        let connector = connector_for(api);

        let err = install_upgrade_script(&connector, &full_settings(), SCRIPT)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.body()["reason"], "Forbidden");
        assert_eq!(err.body()["params"]["name"], UPGRADE_SITE);
    }

    #[tokio::test]
    async fn other_create_failures_are_not_retried() {
        let mut api = MockClusterApi::new();
        api.expect_create_config_map()
            .returning(|_, _| Err(api_error(422, "Invalid")));
        api.expect_replace_config_map().never();
        let connector = connector_for(api);

        let err = install_upgrade_script(&connector, &full_settings(), SCRIPT)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 422);
    }

    #[tokio::test]
    async fn missing_namespace_is_501() {
        let connector = unreachable_connector();
        let err = install_upgrade_script(&connector, &BenchSettings::default(), SCRIPT)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 501);
        assert_eq!(err.body(), json!({ "namespace": NOT_SET }));
    }
}

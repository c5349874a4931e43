//! Stub cluster helpers shared by unit tests.

use crate::cluster::{ClusterApi, MockClusterApi, MockClusterConnector};
use crate::settings::BenchSettings;
use kube::error::ErrorResponse;
use std::sync::Arc;

/// Connector handing out `api` for every operation.
pub fn connector_for(api: MockClusterApi) -> MockClusterConnector {
    let api: Arc<dyn ClusterApi> = Arc::new(api);
    let mut connector = MockClusterConnector::new();
    connector
        .expect_connect()
        .returning(move || Ok(Arc::clone(&api)));
    connector
}

/// Connector that fails the test if any operation reaches the cluster.
pub fn unreachable_connector() -> MockClusterConnector {
    let mut connector = MockClusterConnector::new();
    connector.expect_connect().never();
    connector
}

pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("request failed: {reason}"),
        reason: reason.to_string(),
        code,
    })
}

/// Settings with every field populated.
pub fn full_settings() -> BenchSettings {
    BenchSettings {
        namespace: Some("ns1".to_string()),
        nginx_image: Some("nginx:1".to_string()),
        python_image: Some("py:1".to_string()),
        pvc_name: Some("sites-pvc".to_string()),
        service_name: Some("erpnext-v14".to_string()),
        wildcard_domain: Some("example.com".to_string()),
        wildcard_tls_secret_name: Some("wildcard-tls".to_string()),
        cert_manager_cluster_issuer: Some("letsencrypt".to_string()),
    }
}

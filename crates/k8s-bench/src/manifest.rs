//! Manifest rendering
//!
//! Pure functions building the desired-state Job, Ingress and upgrade-script
//! ConfigMap for a site. Identical inputs always render identical manifests.

use crate::error::{PreconditionError, PreconditionKind, Result};
use crate::settings::{BenchSettings, SettingField};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;
use std::collections::BTreeMap;

/// Prefix of upgrade Job names, also the name of the script ConfigMap.
pub const UPGRADE_SITE: &str = "upgrade-site";
/// Key of the migration program inside the script ConfigMap.
pub const UPGRADE_SCRIPT_KEY: &str = "upgrade_site.py";

pub const SITES_DIR: &str = "sites-dir";
pub const BASE_SITES_DIR: &str = "base-sites-dir";
pub const ASSETS_CACHE: &str = "assets-cache";

pub const BENCH_PATH: &str = "/home/frappe/frappe-bench";
pub const BASE_SITES_PATH: &str = "/opt/base-sites";
pub const ASSETS_PATH: &str = "/assets";

/// Port the bench service listens on.
pub const SERVICE_PORT: i32 = 80;

pub const CLUSTER_ISSUER_ANNOTATION: &str = "cert-manager.io/cluster-issuer";

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_SITE: &str = "k8s-bench.castlecraft.in/site";
const MANAGER: &str = "k8s-bench";

/// Name of the upgrade Job for `site`.
#[must_use]
pub fn upgrade_job_name(site: &str) -> String {
    format!("{UPGRADE_SITE}-{site}")
}

/// Fails with a 400 report when the caller left a required parameter blank.
pub fn require_params<'a>(
    params: impl IntoIterator<Item = (&'static str, &'a str)>,
) -> Result<(), PreconditionError> {
    PreconditionError::check(
        PreconditionKind::MissingParams,
        params.into_iter().map(|(name, value)| (name, Some(value))),
    )
}

/// Render the upgrade Job for `site`, migrating it from the bench whose sites
/// live on `base_pvc_name`.
pub fn build_upgrade_job(
    settings: &BenchSettings,
    site: &str,
    base_pvc_name: &str,
) -> Result<Job> {
    require_params([("site_name", site), ("base_pvc_name", base_pvc_name)])?;
    settings.require(&[
        SettingField::Namespace,
        SettingField::NginxImage,
        SettingField::PythonImage,
        SettingField::PvcName,
    ])?;

    let namespace = settings.get(SettingField::Namespace).unwrap_or_default();
    let nginx_image = settings.get(SettingField::NginxImage).unwrap_or_default();
    let python_image = settings.get(SettingField::PythonImage).unwrap_or_default();
    let pvc_name = settings.get(SettingField::PvcName).unwrap_or_default();

    let job_name = upgrade_job_name(site);
    let labels = site_labels(site);

    let volumes = json!([
        {
            "name": SITES_DIR,
            "persistentVolumeClaim": { "claimName": pvc_name, "readOnly": false }
        },
        {
            "name": BASE_SITES_DIR,
            "persistentVolumeClaim": { "claimName": base_pvc_name, "readOnly": false }
        },
        {
            "name": UPGRADE_SITE,
            "configMap": { "name": UPGRADE_SITE }
        },
        {
            "name": ASSETS_CACHE,
            "emptyDir": {}
        }
    ]);

    let populate_assets = json!({
        "name": "populate-assets",
        "image": nginx_image,
        "command": ["/bin/bash", "-c"],
        "args": [format!("rsync -a --delete /var/www/html/assets/frappe {ASSETS_PATH}")],
        "volumeMounts": [ { "name": ASSETS_CACHE, "mountPath": ASSETS_PATH } ]
    });

    let upgrade_site = json!({
        "name": UPGRADE_SITE,
        "image": python_image,
        "command": [format!("{BENCH_PATH}/env/bin/python")],
        "args": [format!("{BENCH_PATH}/commands/{UPGRADE_SCRIPT_KEY}")],
        "volumeMounts": [
            { "name": SITES_DIR, "mountPath": format!("{BENCH_PATH}/sites") },
            { "name": BASE_SITES_DIR, "mountPath": BASE_SITES_PATH },
            {
                "name": UPGRADE_SITE,
                "mountPath": format!("{BENCH_PATH}/commands"),
                "readOnly": true
            },
            { "name": ASSETS_CACHE, "mountPath": ASSETS_PATH }
        ],
        "env": [
            { "name": "SITE_NAME", "value": site },
            { "name": "FROM_BENCH_PATH", "value": BASE_SITES_PATH }
        ]
    });

    let job_spec = json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": job_name,
            "namespace": namespace,
            "labels": labels
        },
        "spec": {
            // A failed migration is terminal; the pod is never retried.
            "backoffLimit": 0,
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "restartPolicy": "Never",
                    "securityContext": { "supplementalGroups": [1000] },
                    "initContainers": [populate_assets],
                    "containers": [upgrade_site],
                    "volumes": volumes
                }
            }
        }
    });

    Ok(serde_json::from_value(job_spec)?)
}

/// Render the Ingress routing `site` to the bench service over TLS.
pub fn build_ingress(settings: &BenchSettings, site: &str) -> Result<Ingress> {
    settings.require(&[
        SettingField::Namespace,
        SettingField::WildcardDomain,
        SettingField::WildcardTlsSecretName,
        SettingField::CertManagerClusterIssuer,
    ])?;

    let issuer = settings
        .get(SettingField::CertManagerClusterIssuer)
        .unwrap_or_default();
    let wildcard_domain = settings.get(SettingField::WildcardDomain).unwrap_or_default();

    // An unset service leaves the backend name empty; the API server rejects it.
    let service_name = settings.get(SettingField::ServiceName).unwrap_or_default();

    Ok(Ingress {
        metadata: ObjectMeta {
            name: Some(site.to_string()),
            namespace: settings.get(SettingField::Namespace).map(str::to_string),
            labels: Some(site_labels(site)),
            annotations: Some(BTreeMap::from([(
                CLUSTER_ISSUER_ANNOTATION.to_string(),
                issuer.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(site.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service_name.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(SERVICE_PORT),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            tls: Some(vec![IngressTLS {
                hosts: Some(vec![format!("*.{wildcard_domain}")]),
                secret_name: settings
                    .get(SettingField::WildcardTlsSecretName)
                    .map(str::to_string),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Render the ConfigMap holding the migration program mounted by upgrade Jobs.
pub fn build_upgrade_script_config_map(
    settings: &BenchSettings,
    script: &str,
) -> Result<ConfigMap> {
    let namespace = settings.namespace()?;

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(UPGRADE_SITE.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_MANAGED_BY.to_string(),
                MANAGER.to_string(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            UPGRADE_SCRIPT_KEY.to_string(),
            script.to_string(),
        )])),
        ..Default::default()
    })
}

fn site_labels(site: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), MANAGER.to_string()),
        (LABEL_SITE.to_string(), sanitize_label_value(site)),
    ])
}

/// Kubernetes label values: at most 63 characters of `[A-Za-z0-9._-]`,
/// starting and ending alphanumeric.
fn sanitize_label_value(input: &str) -> String {
    let mapped: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(63)
        .collect();

    mapped
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

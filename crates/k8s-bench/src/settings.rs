//! Bench settings
//!
//! Snapshot of the cluster parameters used to render manifests. The record is
//! owned by an external configuration store; this crate only reads it, fresh
//! on every orchestration call.

use crate::error::{Error, PreconditionError, PreconditionKind, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Prefix of the environment variables that override settings fields.
pub const ENV_PREFIX: &str = "K8S_BENCH_";

/// Cluster parameters for a bench. Every field is optional; each operation
/// checks the subset it needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BenchSettings {
    pub namespace: Option<String>,
    pub nginx_image: Option<String>,
    pub python_image: Option<String>,
    pub pvc_name: Option<String>,
    pub service_name: Option<String>,
    pub wildcard_domain: Option<String>,
    pub wildcard_tls_secret_name: Option<String>,
    #[serde(alias = "cluster_issuer")]
    pub cert_manager_cluster_issuer: Option<String>,
}

/// Named settings fields, used for validation reports and env overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingField {
    Namespace,
    NginxImage,
    PythonImage,
    PvcName,
    ServiceName,
    WildcardDomain,
    WildcardTlsSecretName,
    CertManagerClusterIssuer,
}

impl SettingField {
    pub const ALL: [Self; 8] = [
        Self::Namespace,
        Self::NginxImage,
        Self::PythonImage,
        Self::PvcName,
        Self::ServiceName,
        Self::WildcardDomain,
        Self::WildcardTlsSecretName,
        Self::CertManagerClusterIssuer,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::NginxImage => "nginx_image",
            Self::PythonImage => "python_image",
            Self::PvcName => "pvc_name",
            Self::ServiceName => "service_name",
            Self::WildcardDomain => "wildcard_domain",
            Self::WildcardTlsSecretName => "wildcard_tls_secret_name",
            Self::CertManagerClusterIssuer => "cert_manager_cluster_issuer",
        }
    }

    /// Environment variable overriding this field, e.g. `K8S_BENCH_NAMESPACE`.
    #[must_use]
    pub fn env_var(self) -> String {
        format!("{ENV_PREFIX}{}", self.name().to_ascii_uppercase())
    }
}

impl BenchSettings {
    /// Value of a field, with blank strings treated as unset.
    #[must_use]
    pub fn get(&self, field: SettingField) -> Option<&str> {
        let value = match field {
            SettingField::Namespace => &self.namespace,
            SettingField::NginxImage => &self.nginx_image,
            SettingField::PythonImage => &self.python_image,
            SettingField::PvcName => &self.pvc_name,
            SettingField::ServiceName => &self.service_name,
            SettingField::WildcardDomain => &self.wildcard_domain,
            SettingField::WildcardTlsSecretName => &self.wildcard_tls_secret_name,
            SettingField::CertManagerClusterIssuer => &self.cert_manager_cluster_issuer,
        };
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    pub(crate) fn slot(&mut self, field: SettingField) -> &mut Option<String> {
        match field {
            SettingField::Namespace => &mut self.namespace,
            SettingField::NginxImage => &mut self.nginx_image,
            SettingField::PythonImage => &mut self.python_image,
            SettingField::PvcName => &mut self.pvc_name,
            SettingField::ServiceName => &mut self.service_name,
            SettingField::WildcardDomain => &mut self.wildcard_domain,
            SettingField::WildcardTlsSecretName => &mut self.wildcard_tls_secret_name,
            SettingField::CertManagerClusterIssuer => &mut self.cert_manager_cluster_issuer,
        }
    }

    /// Fails with a 501 report when any of `fields` is unset.
    pub fn require(&self, fields: &[SettingField]) -> Result<(), PreconditionError> {
        PreconditionError::check(
            PreconditionKind::MissingSettings,
            fields.iter().map(|field| (field.name(), self.get(*field))),
        )
    }

    /// The configured namespace, or a 501 report naming it.
    pub fn namespace(&self) -> Result<&str, PreconditionError> {
        self.require(&[SettingField::Namespace])?;
        Ok(self.get(SettingField::Namespace).unwrap_or_default())
    }

    /// Overwrite fields for which `overrides` carries a non-blank value.
    pub fn merge(&mut self, overrides: &Self) {
        for field in SettingField::ALL {
            if let Some(value) = overrides.get(field) {
                *self.slot(field) = Some(value.to_string());
            }
        }
    }

    /// Settings taken from `K8S_BENCH_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        for field in SettingField::ALL {
            if let Ok(value) = std::env::var(field.env_var()) {
                *settings.slot(field) = Some(value);
            }
        }
        settings
    }

    /// Load settings from a mounted YAML (or JSON) file.
    pub fn from_mounted_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read settings file {}: {e}",
                path.display()
            ))
        })?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&raw)
            .map_err(|e| Error::Configuration(format!("Failed to parse settings YAML: {e}")))
    }

    /// Log the effective settings, one field per line.
    pub fn log_summary(&self) {
        for field in SettingField::ALL {
            info!(
                field = field.name(),
                value = self.get(field).unwrap_or("(unset)"),
                "Bench setting"
            );
        }
    }
}

/// Source of the current settings snapshot.
pub trait SettingsProvider: Send + Sync {
    /// Read the settings as they are right now.
    fn load(&self) -> Result<BenchSettings>;
}

impl SettingsProvider for BenchSettings {
    fn load(&self) -> Result<BenchSettings> {
        Ok(self.clone())
    }
}

/// Reads settings from a file on every call, layering env overrides on top.
#[derive(Debug, Clone)]
pub struct FileSettingsProvider {
    path: PathBuf,
    env_overrides: bool,
}

impl FileSettingsProvider {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env_overrides: true,
        }
    }

    /// Ignore `K8S_BENCH_*` variables.
    #[must_use]
    pub fn without_env_overrides(mut self) -> Self {
        self.env_overrides = false;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsProvider for FileSettingsProvider {
    fn load(&self) -> Result<BenchSettings> {
        let mut settings = if self.path.exists() {
            debug!(path = %self.path.display(), "Reading bench settings");
            BenchSettings::from_mounted_file(&self.path)?
        } else {
            warn!(
                path = %self.path.display(),
                "Settings file not found, starting from empty settings"
            );
            BenchSettings::default()
        };

        if self.env_overrides {
            settings.merge(&BenchSettings::from_env());
        }

        Ok(settings)
    }
}

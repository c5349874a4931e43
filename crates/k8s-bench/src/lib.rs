/*
 * k8s-bench - Per-site Kubernetes orchestration for benches
 * Copyright (C) 2025 Castlecraft Ecommerce Pvt Ltd
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Per-site Kubernetes orchestration
//!
//! Renders upgrade Jobs and site Ingresses from the bench settings, submits
//! them to the cluster, and reports every outcome as a JSON document or a
//! uniform `{error, params, reason?}` failure with a status code.

pub mod api;
pub mod cleanup;
pub mod cluster;
pub mod error;
pub mod ingress;
pub mod jobs;
pub mod manifest;
pub mod script;
pub mod settings;
pub mod translate;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use api::{build_router, AppState};
pub use cleanup::{delete_site_resources, CleanupReport};
pub use cluster::{ClusterApi, ClusterConfig, ClusterConnector, KubeConnector, Removed};
pub use error::{ClusterFailure, Error, PreconditionError, Result, NOT_SET};
pub use ingress::{create_ingress, read_ingress, repoint_ingress};
pub use jobs::{create_upgrade_job, get_status, JobPhase};
pub use script::install_upgrade_script;
pub use settings::{BenchSettings, FileSettingsProvider, SettingField, SettingsProvider};

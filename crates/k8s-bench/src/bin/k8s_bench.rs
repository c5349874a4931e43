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

//! k8s-bench service
//!
//! Serves the site orchestration API, or installs the upgrade script
//! ConfigMap and exits.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use k8s_bench::{
    build_router, install_upgrade_script, AppState, ClusterConfig, ClusterConnector,
    FileSettingsProvider, KubeConnector, SettingsProvider,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "k8s-bench", version, about = "Per-site Kubernetes orchestration")]
struct Cli {
    /// Bench settings file (YAML or JSON), re-read on every request
    #[arg(
        long,
        env = "K8S_BENCH_SETTINGS",
        default_value = "/config/bench-settings.yaml",
        global = true
    )]
    settings: PathBuf,

    /// Use a local kubeconfig instead of the in-cluster service account
    #[arg(long, env = "K8S_BENCH_DEVELOPER_MODE", global = true)]
    developer_mode: bool,

    /// Kubeconfig path used in developer mode
    #[arg(long, env = "KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Log output format
    #[arg(
        long,
        env = "K8S_BENCH_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text,
        global = true
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, env = "K8S_BENCH_LISTEN", default_value = "0.0.0.0:8080")]
        listen: SocketAddr,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 60)]
        request_timeout: u64,
    },
    /// Create or replace the upgrade script ConfigMap
    InstallScript {
        /// Migration program to publish
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    info!("Starting k8s-bench v{}", env!("CARGO_PKG_VERSION"));

    let settings: Arc<dyn SettingsProvider> =
        Arc::new(FileSettingsProvider::new(cli.settings.clone()));
    let cluster: Arc<dyn ClusterConnector> = Arc::new(KubeConnector::new(ClusterConfig {
        developer_mode: cli.developer_mode,
        kubeconfig: cli.kubeconfig.clone(),
    }));

    match cli.command {
        Command::Serve {
            listen,
            request_timeout,
        } => serve(settings, cluster, listen, request_timeout).await,
        Command::InstallScript { file } => install_script(settings, cluster, &file).await,
    }
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,k8s_bench=debug"))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
    Ok(())
}

async fn serve(
    settings: Arc<dyn SettingsProvider>,
    cluster: Arc<dyn ClusterConnector>,
    listen: SocketAddr,
    request_timeout: u64,
) -> Result<()> {
    match settings.load() {
        Ok(current) => current.log_summary(),
        Err(err) => warn!(error = %err, "Bench settings are not readable yet"),
    }

    let app = build_router(AppState::new(settings, cluster)).layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_request(DefaultOnRequest::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(CorsLayer::permissive())
            .layer(TimeoutLayer::new(Duration::from_secs(request_timeout))),
    );

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind to {listen}"))?;
    info!(%listen, "k8s-bench HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("k8s-bench stopped");
    Ok(())
}

async fn install_script(
    settings: Arc<dyn SettingsProvider>,
    cluster: Arc<dyn ClusterConnector>,
    file: &Path,
) -> Result<()> {
    let script = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read upgrade script {}", file.display()))?;
    let settings = settings.load().context("Failed to load bench settings")?;

    match install_upgrade_script(cluster.as_ref(), &settings, &script).await {
        Ok(document) => {
            info!(
                name = %document["metadata"]["name"],
                namespace = %document["metadata"]["namespace"],
                "Upgrade script installed"
            );
            Ok(())
        }
        Err(err) => Err(anyhow::anyhow!(
            "Failed to install upgrade script ({}): {}",
            err.status_code(),
            err.body()
        )),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}

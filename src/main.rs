//! HostPath Provisioner
//!
//! Dynamically provisions PersistentVolumes backed by host directories for
//! claims that request this provisioner.

use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hostpath_provisioner::{
    ControllerConfig, Error, HostPathConfig, HostPathProvisioner, ProvisionController,
    ProvisionerMetrics, ReclaimPolicy, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// HostPath Provisioner - host directory backed PersistentVolumes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the provisioner. Only claims requesting this provisioner are served
    #[arg(long, env = "PROVISIONER_NAME", default_value = "example.com/hostpath")]
    provisioner: String,

    /// Volumes root folder
    #[arg(long, env = "PV_ROOT_DIR", default_value = "/tmp/hostpath-provisioner")]
    pv_root_dir: PathBuf,

    /// Default reclaim policy, 'Retain' or 'Delete'
    #[arg(long, env = "DEFAULT_RECLAIM_POLICY", default_value = "Delete")]
    default_reclaim_policy: String,

    /// API server URL, overrides the one from kubeconfig
    #[arg(long, env = "KUBE_MASTER")]
    master: Option<String>,

    /// Path to a kubeconfig file, for running out of cluster
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Requeue interval in seconds after a transient failure
    #[arg(long, env = "RESYNC_SECS", default_value = "15")]
    resync_secs: u64,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let default_reclaim_policy: ReclaimPolicy = match args.default_reclaim_policy.parse() {
        Ok(policy) => policy,
        Err(e) => {
            error!("{}", e);
            return Err(e);
        }
    };

    info!("Starting HostPath Provisioner");
    info!("  Version: {}", hostpath_provisioner::VERSION);
    info!("  Provisioner: {}", args.provisioner);
    info!("  Root dir: {}", args.pv_root_dir.display());
    info!("  Default reclaim policy: {}", default_reclaim_policy);

    let client = match build_client(&args).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create Kubernetes client: {}", e);
            return Err(e);
        }
    };

    let metrics = ProvisionerMetrics::register(prometheus::default_registry())?;

    let provisioner = HostPathProvisioner::new(HostPathConfig {
        root_dir: args.pv_root_dir.clone(),
        default_reclaim_policy,
        ..Default::default()
    });
    info!("Provisioner identity: {}", provisioner.identity());

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let controller_config = ControllerConfig {
        provisioner_name: args.provisioner.clone(),
        resync_period: Duration::from_secs(args.resync_secs),
    };

    ProvisionController::new(client, controller_config, Arc::new(provisioner), metrics)
        .run()
        .await;

    info!("Provisioner shutdown complete");
    Ok(())
}

// =============================================================================
// Kubernetes Client
// =============================================================================

async fn build_client(args: &Args) -> Result<Client> {
    let mut config = match &args.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::Configuration(format!("Invalid kubeconfig {}: {}", path.display(), e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::Configuration(format!("Invalid kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::Configuration(format!("Failed to infer config: {}", e)))?,
    };

    if let Some(master) = &args.master {
        config.cluster_url = master
            .parse::<hyper::Uri>()
            .map_err(|e| Error::Configuration(format!("Invalid master URL: {}", e)))?;
    }

    Ok(Client::try_from(config)?)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let (status, body) = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => (StatusCode::OK, "ok"),
                _ => (StatusCode::NOT_FOUND, "not found"),
            };
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            let mut response = Response::new(Body::from(buffer));
                            if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
                                response.headers_mut().insert(CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => {
                            let mut response = Response::new(Body::from(e.to_string()));
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            response
                        }
                    }
                }
                _ => {
                    let mut response = Response::new(Body::from("not found"));
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    response
                }
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

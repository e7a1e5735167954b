//! Claim Provisioner
//!
//! Watches persistent volume claims and provisions their volumes through a
//! Docker-style volume plugin.

use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claim_provisioner::adapters::{KubeClassLookup, KubeEventSink, KubeVolumeSink};
use claim_provisioner::config::{
    DEFAULT_FACTOR_FOR_CONVERSION, DEFAULT_NAME_PREFIX, DEFAULT_REGISTRY_SOCKET_PATH,
    DEFAULT_SOCKET_PATH,
};
use claim_provisioner::{
    ClaimController, ClaimInformer, Error, Metrics, PluginOptions, ProvisionerConfig, Result,
    VolumePluginClient, VolumeProvisioner,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Claim Provisioner - dynamic volumes for persistent volume claims
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Provisioner prefix serviced by this instance
    #[arg(long, env = "PROVISIONER_NAME_PREFIX", default_value = DEFAULT_NAME_PREFIX)]
    name_prefix: String,

    /// Plugin socket path, or the name of a managed plugin
    #[arg(long, env = "PLUGIN_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket_path: String,

    /// Socket of the managed plugin registry
    #[arg(long, env = "PLUGIN_REGISTRY_SOCKET", default_value = DEFAULT_REGISTRY_SOCKET_PATH)]
    registry_socket_path: PathBuf,

    /// Strip kubernetes.io options before creating volumes
    #[arg(long, env = "STRIP_K8S_OPTIONS", default_value_t = true, action = ArgAction::Set)]
    strip_k8s_options: bool,

    /// Create volumes (false adopts existing ones)
    #[arg(long, env = "CREATE_VOLUMES", default_value_t = true, action = ArgAction::Set)]
    create_volumes: bool,

    /// Option keys receiving the requested size
    #[arg(long, env = "STORAGE_RESOURCE_OPTIONS", value_delimiter = ',', default_value = "size")]
    storage_resource_options: Vec<String>,

    /// Bytes per unit of the size handed to the plugin
    #[arg(long, env = "FACTOR_FOR_CONVERSION", default_value_t = DEFAULT_FACTOR_FOR_CONVERSION)]
    factor_for_conversion: u64,

    /// Claim cache resync period in seconds
    #[arg(long, env = "RESYNC_PERIOD", default_value = "300")]
    resync_period_secs: u64,

    /// Upper bound on the wait for a clone source claim, in seconds
    #[arg(long, env = "MAX_WAIT_FOR_CLAIMS", default_value = "30")]
    max_wait_for_claims: u64,

    /// How long a provisioned claim is watched for binding, in seconds
    #[arg(long, env = "BIND_TIMEOUT", default_value = "60")]
    bind_timeout_secs: u64,

    /// Timeout of a single plugin request, in seconds
    #[arg(long, env = "PLUGIN_REQUEST_TIMEOUT", default_value = "60")]
    request_timeout_secs: u64,

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

impl Args {
    fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            name_prefix: self.name_prefix.clone(),
            resync_period: Duration::from_secs(self.resync_period_secs),
            max_wait_for_claims: self.max_wait_for_claims,
            bind_timeout: Duration::from_secs(self.bind_timeout_secs),
        }
    }

    fn plugin_options(&self) -> PluginOptions {
        PluginOptions {
            socket_path: self.socket_path.clone(),
            registry_socket_path: self.registry_socket_path.clone(),
            strip_k8s_from_options: self.strip_k8s_options,
            create_volumes: self.create_volumes,
            storage_resource_options: self.storage_resource_options.clone(),
            factor_for_conversion: self.factor_for_conversion,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Claim Provisioner");
    info!("  Version: {}", claim_provisioner::VERSION);
    info!("  Name prefix: {}", args.name_prefix);
    info!("  Plugin socket: {}", args.socket_path);
    info!("  Create volumes: {}", args.create_volumes);

    let config = args.provisioner_config();
    let options = args.plugin_options();
    let metrics = Arc::new(Metrics::new()?);

    // Connect to the volume plugin
    let (plugin, probe) = VolumePluginClient::connect(&options).await?;
    if let Some(e) = probe {
        warn!("Volume plugin did not answer the capabilities probe: {}", e);
    }

    // Connect to the cluster
    let client = kube::Client::try_default().await?;
    let informer = ClaimInformer::new(config.resync_period);
    let events = Arc::new(KubeEventSink::new(client.clone(), claim_provisioner::NAME));

    let provisioner = Arc::new(VolumeProvisioner::new(
        config.clone(),
        options,
        Arc::new(plugin),
        Arc::new(informer.store()),
        events.clone(),
        Arc::new(KubeVolumeSink::new(client.clone())),
    ));
    let controller = ClaimController::new(
        config,
        Arc::new(KubeClassLookup::new(client.clone())),
        events,
        provisioner,
        metrics.clone(),
    );

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let served = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, served).await {
            error!("Metrics server error: {}", e);
        }
    });

    informer.start(client, Arc::new(controller));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    informer.stop().await;

    info!("Provisioner shutdown complete");
    Ok(())
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

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid health server address: {}", e)))?;

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

async fn run_metrics_server(addr: &str, metrics: Arc<Metrics>) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = if req.uri().path() != "/metrics" {
                        let mut response = Response::new(Body::from("not found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        response
                    } else {
                        match metrics.encode() {
                            Ok(buffer) => {
                                let mut response = Response::new(Body::from(buffer));
                                response.headers_mut().insert(
                                    CONTENT_TYPE,
                                    HeaderValue::from_static(prometheus::TEXT_FORMAT),
                                );
                                response
                            }
                            Err(e) => {
                                let mut response = Response::new(Body::from(e.to_string()));
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                response
                            }
                        }
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

#![doc = include_str!("../README.md")]

mod server;
mod users;

use clap::Parser;
use futures::Stream;
use server::config::{CliArgs, ServerConfig};
use server::metrics::CallMetricsLayer;
use server::telemetry::{Telemetry, init_telemetry};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_views::{Engine, RpcModules, Servicer, StubRegistry};
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use users::TestService;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    // Views run on the blocking pool, so its size bounds concurrent calls.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.num_workers)
        .build()?
        .block_on(run(config))
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let telemetry = init_telemetry()?;

    let mut stubs = StubRegistry::new();
    let mut modules = RpcModules::new();
    users::register(&mut stubs, &mut modules, &config.stub_location)?;
    let engine = Arc::new(Engine::new(
        config.settings([users::definition()])?,
        stubs,
        modules,
    ));

    if config.check {
        let checked = engine.check().map(|reports| {
            for _report in reports {
                #[cfg(feature = "tracing")]
                tracing::info!(
                    service = %_report.service,
                    bound = ?_report.bound,
                    unbound = ?_report.unbound,
                    "Service validated"
                );
            }
        });
        telemetry.shutdown();
        return Ok(checked?);
    }

    if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            let incoming = UnixListenerStream::new(uds);
            log_startup_info(&uds_path, &config);
            let res = run_server_with_incoming(engine, telemetry, incoming).await;
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        let incoming = TcpListenerStream::new(tcp);
        log_startup_info(&tcp_path, &config);
        run_server_with_incoming(engine, telemetry, incoming).await
    }
}

async fn run_server_with_incoming<I, IO, IE>(
    engine: Arc<Engine>,
    telemetry: Telemetry,
    incoming: I,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let service = build_users_service(engine.bind::<TestService>()?);

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<Servicer<TestService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(tonic_views_proto::FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let metrics = CallMetricsLayer::new();

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new())
                .layer(metrics.clone()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(service)
        .serve_with_incoming_shutdown(
            incoming,
            shutdown_signal(Arc::clone(&engine), health_reporter, telemetry),
        )
        .await?;

    #[cfg(feature = "tracing")]
    tracing::info!(inflight = metrics.inflight(), "Service shut down successfully");
    Ok(())
}

fn log_startup_info(_addr: &str, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting view service on {} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting view service on {} with {} workers",
            _addr,
            _config.num_workers
        );
    }
}

fn build_users_service(service: Servicer<TestService>) -> Servicer<TestService> {
    service
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

async fn shutdown_signal(engine: Arc<Engine>, health_reporter: HealthReporter, telemetry: Telemetry) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {:?}", _e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {:?}", _e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_not_serving::<Servicer<TestService>>()
        .await;

    // 2. Fail calls still running with UNAVAILABLE
    engine.shutdown();

    // 3. Flush exporters
    telemetry.shutdown();
}

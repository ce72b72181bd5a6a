use std::{process, sync::Arc, time::Duration};

use riparo::{
    application::{bootstrap::Runtime, error::AppError, transport::Transport},
    cache::{self, CacheConfig},
    config,
    infra::{
        error::InfraError,
        http::{self, ProxyState},
        network::ReqwestTransport,
        telemetry,
    },
    worker::{CutoverReport, StartupReport},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Warm(_) => run_warm(settings).await,
        config::Command::Generations(_) => run_generations(settings).await,
    }
}

fn build_runtime(settings: &config::Settings) -> Result<Runtime, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let storage = cache::build_storage(&cache_config.backend);
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(&settings.origin)?);

    Runtime::new(
        &cache_config,
        settings.origin.public_url.clone(),
        settings.classifier.rules(),
        storage,
        transport,
    )
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let runtime = Arc::new(build_runtime(&settings)?);

    let startup = runtime.startup().await?;
    log_startup(&startup);

    let manual_cutover = !settings.cache.skip_waiting;
    if manual_cutover {
        info!(
            target = "riparo::serve",
            path = http::CUTOVER_PATH,
            "Waiting for cutover; requests pass through until then"
        );
    } else {
        let cutover = runtime.cutover().await?;
        log_cutover(&cutover);
    }

    let state = ProxyState {
        runtime,
        public_url: settings.origin.public_url.clone(),
        body_limit: usize::try_from(settings.server.max_request_bytes.get())
            .unwrap_or(usize::MAX),
    };
    let router = http::build_router(state, manual_cutover);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "riparo::serve",
        address = %settings.server.addr,
        public = %settings.origin.public_url,
        upstream = %settings.origin.upstream_url,
        "Proxy listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(settings.server.graceful_shutdown))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!(target = "riparo::serve", "Proxy shut down");
    Ok(())
}

async fn run_warm(settings: config::Settings) -> Result<(), AppError> {
    let runtime = build_runtime(&settings)?;

    let startup = runtime.startup().await?;
    log_startup(&startup);
    let cutover = runtime.cutover().await?;
    log_cutover(&cutover);

    println!("namespace: {}", startup.namespace);
    println!("cached: {}", startup.cached.len());
    for failure in &startup.failed {
        println!("failed: {} ({})", failure.path, failure.reason);
    }
    for name in &cutover.deleted {
        println!("deleted: {name}");
    }
    for failure in &cutover.failed {
        println!("not deleted: {} ({})", failure.namespace, failure.reason);
    }

    Ok(())
}

async fn run_generations(settings: config::Settings) -> Result<(), AppError> {
    let runtime = build_runtime(&settings)?;
    let current = runtime.worker().lifecycle().namespace().clone();

    for name in runtime.generations().await? {
        let marker = if name == current { "*" } else { " " };
        println!("{marker} {name}");
    }

    Ok(())
}

fn log_startup(report: &StartupReport) {
    info!(
        target = "riparo::startup",
        namespace = %report.namespace,
        cached = report.cached.len(),
        failed = report.failed.len(),
        "Cache populated"
    );
}

fn log_cutover(report: &CutoverReport) {
    if !report.failed.is_empty() {
        warn!(
            target = "riparo::cutover",
            failed = report.failed.len(),
            "Some stale generations could not be deleted"
        );
    }
}

/// Resolves on ctrl-c. In-flight requests then get `grace` to finish before
/// the process exits regardless.
async fn shutdown_signal(grace: Duration) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return std::future::pending().await;
    }
    info!(
        target = "riparo::serve",
        grace_seconds = grace.as_secs(),
        "Shutdown signal received, draining connections"
    );
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(target = "riparo::serve", "Graceful shutdown timed out");
        process::exit(1);
    });
}

use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use feedfilter::{
    application::{error::AppError, feed::FeedService, filter::FilterOptions},
    cache::{CacheConfig, CacheState, DiskStore, HttpProbe},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
        upstream::HttpFeedSource,
    },
};
use tokio::sync::watch;
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
    let (_cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let http_state = build_http_state(&settings)?;
    serve_http(&settings, http_state).await
}

fn build_http_state(settings: &config::Settings) -> Result<HttpState, AppError> {
    let source = HttpFeedSource::new(
        settings.upstream.fetch_timeout,
        &settings.upstream.user_agent,
    )?;
    let feed = FeedService::new(
        Arc::new(source),
        FilterOptions::from(&settings.filters),
    );

    let cache_config = CacheConfig::from(&settings.cache);
    let cache = if cache_config.enabled {
        let store = DiskStore::open(&cache_config.directory).map_err(InfraError::from)?;
        let probe = HttpProbe::new(cache_config.probe_timeout, &settings.upstream.user_agent)
            .map_err(|err| InfraError::upstream(err.to_string()))?;

        info!(
            target = "feedfilter::bootstrap",
            directory = %store.root().display(),
            coalesce_misses = cache_config.coalesce_misses,
            "Disk cache ready"
        );
        Some(CacheState::new(cache_config, Arc::new(store), Arc::new(probe)))
    } else {
        info!(target = "feedfilter::bootstrap", "Disk cache disabled");
        None
    };

    Ok(HttpState {
        feed: Arc::new(feed),
        cache,
        request_timeout: settings.server.request_timeout,
    })
}

async fn serve_http(settings: &config::Settings, http_state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(http_state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "feedfilter::bootstrap",
        addr = %settings.server.addr,
        "Listening"
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .into_future();

    let drain_deadline = drain_deadline(&mut shutdown_rx, settings.server.graceful_shutdown);

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = drain_deadline => {
            warn!(
                target = "feedfilter::bootstrap",
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
        }
    }

    info!(target = "feedfilter::bootstrap", "Server stopped");
    Ok(())
}

async fn drain_deadline(shutdown: &mut watch::Receiver<bool>, limit: Duration) {
    if shutdown.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(limit).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "feedfilter::bootstrap", error = %err, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target = "feedfilter::bootstrap", error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(target = "feedfilter::bootstrap", "Shutdown signal received");
}

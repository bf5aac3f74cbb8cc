use std::{process, sync::Arc};

use ingest_relay::{
    application::{
        error::AppError,
        ingest::IngestService,
        relay::{RelayConfig, RelayLoop},
        retrieve::RetrieveService,
    },
    config,
    infra::{
        backends::Backends,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio_util::sync::CancellationToken;
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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Check(_) => run_check(settings).await,
    }
}

async fn connect_backends(settings: &config::Settings) -> Result<Backends, AppError> {
    let backends = Backends::connect(&settings.broker, &settings.cache).await?;
    backends.probe().await?;
    Ok(backends)
}

async fn run_check(settings: config::Settings) -> Result<(), AppError> {
    connect_backends(&settings).await?;
    info!(
        topic = %settings.broker.topic,
        cache_key = %settings.cache.key,
        "Configuration resolved and backends reachable"
    );
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let backends = connect_backends(&settings).await?;
    let shutdown = CancellationToken::new();

    let relay = RelayLoop::new(
        RelayConfig {
            topic: settings.broker.topic.clone(),
            partition: settings.broker.partition,
            start: settings.relay.start_position,
            cache_key: settings.cache.key.clone(),
            ttl: settings.cache.ttl,
        },
        backends.subscriber.clone(),
        backends.cache.clone(),
    )
    .spawn(shutdown.child_token());

    let state = HttpState {
        ingest: Arc::new(IngestService::new(
            backends.publisher.clone(),
            settings.broker.topic.clone(),
        )),
        retrieve: Arc::new(RetrieveService::new(
            backends.cache.clone(),
            settings.cache.key.clone(),
        )),
        relay_state: relay.state(),
        max_body_bytes: settings.server.max_body_bytes,
    };

    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "HTTP listener bound");

    let server_token = shutdown.clone();
    let server = axum::serve(listener, http::build_router(state))
        .with_graceful_shutdown(async move { server_token.cancelled().await });

    // Either side ending takes the other one down with it.
    let (served, relayed) = tokio::join!(
        async {
            let outcome = server.await;
            shutdown.cancel();
            outcome
        },
        async {
            let outcome = relay.join().await;
            shutdown.cancel();
            outcome
        }
    );

    served.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
    relayed?;
    info!("Shut down cleanly");
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}

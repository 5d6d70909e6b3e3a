use crate::cli::ServeArgs;
use crate::infra::{shutdown_signal, AppState};
use crate::routes::with_permit_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use buergerbuero::config::AppConfig;
use buergerbuero::error::AppError;
use buergerbuero::permits::{
    EventDispatcher, InMemoryPermitStore, PermitWorkflowService, TracingEventSink,
};
use buergerbuero::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let (emitter, dispatcher) =
        EventDispatcher::spawn(Arc::new(TracingEventSink), config.events.dispatch());
    let service = Arc::new(PermitWorkflowService::new(
        Arc::new(InMemoryPermitStore::new()),
        emitter,
        config.events.settings(),
    ));

    let app = with_permit_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "permit request service ready");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    readiness_flag.store(false, Ordering::Release);
    info!("draining event queue");
    let dead_letters = dispatcher.dead_letters().clone();
    dispatcher.shutdown().await;
    let undelivered = dead_letters.snapshot().len();
    let evicted = dead_letters.evicted();
    if undelivered > 0 || evicted > 0 {
        warn!(undelivered, evicted, "events were dead-lettered during this run");
    }

    served?;
    Ok(())
}

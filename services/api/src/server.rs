use crate::cli::ServeArgs;
use crate::infra::{AppState, LoggingMailer};
use crate::routes::with_office_routes;
use admissions_desk::config::AppConfig;
use admissions_desk::error::AppError;
use admissions_desk::telemetry;
use admissions_desk::workflows::admissions::{
    ActivityLogSubscriber, AdmissionsDesk, EventBus, InMemoryDocumentStore, InMemoryLedger,
    LedgerContext, NotificationSubscriber, Sequencer,
};
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let mailer = Arc::new(LoggingMailer::new(&config.notifications));
    let events = EventBus::new()
        .with_subscriber(Arc::new(NotificationSubscriber::new(
            mailer,
            config.notifications.clone(),
        )))
        .with_subscriber(Arc::new(ActivityLogSubscriber));
    let ctx = LedgerContext::new(
        Arc::new(InMemoryLedger::new()),
        Arc::new(InMemoryDocumentStore::new()),
        events,
    )
    .with_sequencer(Sequencer::new(config.ledger.sequence_retry_limit));
    let desk = Arc::new(AdmissionsDesk::new(ctx));

    let app = with_office_routes(desk)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "admissions desk ready");

    axum::serve(listener, app).await?;
    Ok(())
}

use actix_web::{web, App, HttpServer};
use chat_service::{
    clock::SystemClock,
    config, db, error, logging,
    middleware::RequestIdMiddleware,
    routes,
    services::{
        IdentityClient, KafkaNotificationSink, LogNotificationSink, NotificationSink,
        TrustTokenDirectory, UserDirectory,
    },
    state::{AppState, Collaborators},
    store::{ChatStore, MemoryStore, PgStore},
    websocket::{NoopPresenceMirror, PresenceMirror, RedisPresenceMirror},
};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let store: Arc<dyn ChatStore> = match cfg.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            tracing::info!("using PostgreSQL store");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let users: Arc<dyn UserDirectory> = match cfg.identity_service_url.as_deref() {
        Some(url) => Arc::new(IdentityClient::new(url)?),
        None => {
            tracing::warn!("IDENTITY_SERVICE_URL not set, trusting authenticated user ids");
            Arc::new(TrustTokenDirectory)
        }
    };

    let sink: Arc<dyn NotificationSink> = match &cfg.kafka {
        Some(kafka) => Arc::new(KafkaNotificationSink::new(
            &kafka.brokers,
            &kafka.notification_topic,
        )?),
        None => Arc::new(LogNotificationSink),
    };

    let mirror: Arc<dyn PresenceMirror> = match cfg.redis_url.as_deref() {
        Some(url) => Arc::new(
            RedisPresenceMirror::from_url(url)
                .await
                .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?,
        ),
        None => Arc::new(NoopPresenceMirror),
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let (state, _notification_worker) = AppState::build(
        cfg,
        Collaborators {
            store,
            users,
            sink,
            mirror,
            clock: Arc::new(SystemClock),
        },
    );

    tracing::info!(%bind_addr, "starting chat-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(RequestIdMiddleware)
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("server: {e}")))
}

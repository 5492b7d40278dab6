//! Main entry point for the delivery watch backend server.
//! This crate wires the REST API endpoints and runs the background watch system.

mod config;
mod watch_manager;

use std::sync::Arc;

use actix_web::{App, HttpResponse, HttpServer, middleware::Logger, web};
use anyhow::Context;
use auth_services::middleware::UserContextMiddleware;
use auth_services::providers::ProviderRegistry;
use auth_services::store::PgIdentityStore;
use auth_services::{Clock, SessionCache, SessionTtls, SystemClock};
use notification_services::{LogMailer, Mailer, NotificationDispatcher, SesMailer};
use postgres::database::*;
use subscription_watch::{
    DirectoryClient, PgSubscriptionStore, PrunerConfig, RetentionPruner, SubscriptionService,
    SubscriptionWatcher, WatchStats, WatcherConfig,
};
use web_handlers::*;

use crate::config::{AppConfig, MailBackend};
use crate::watch_manager::WatchManager;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    log::info!("🚀 Starting delivery watch server...");

    let config = AppConfig::from_env().context("invalid configuration")?;

    // Create database connection pool
    let pool = create_connection_pool(&config.database_url)
        .await
        .context("failed to create database pool")?;
    log::info!("🗃️ Database pool created successfully");
    if let Err(e) = test_connection(&pool).await {
        log::error!("❌ Database connection test failed: {}", e);
    }
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    // Create mailer
    let mailer: Arc<dyn Mailer> = match config.mail_backend {
        MailBackend::Ses => {
            log::info!("📧 Sending mail through AWS SES as {}", config.from_email);
            Arc::new(SesMailer::new(config.from_email.clone()).await)
        }
        MailBackend::Log => {
            log::warn!("🔧 MAIL_BACKEND=log, mails are only written to the log");
            Arc::new(LogMailer)
        }
    };
    let dispatcher = NotificationDispatcher::new(mailer, config.operator_email.clone())
        .with_send_timeout(config.http_timeout);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let identities = Arc::new(PgIdentityStore::new(pool.clone()));
    let subscriptions = Arc::new(PgSubscriptionStore::new(pool.clone()));
    let directory = Arc::new(
        DirectoryClient::new(config.directory_base_url.clone(), config.http_timeout)
            .context("failed to create directory client")?,
    );

    let providers = ProviderRegistry::with_default_providers(config.http_timeout)
        .context("failed to create identity provider client")?;
    let sessions = Arc::new(SessionCache::new(
        identities.clone(),
        providers,
        dispatcher.clone(),
        clock.clone(),
        config.operator_email.clone(),
        SessionTtls {
            hit_extension: chrono::Duration::hours(config.session_hit_extension_hours),
            new_identity: chrono::Duration::hours(config.session_new_ttl_hours),
            returning_identity: chrono::Duration::hours(config.session_returning_ttl_hours),
        },
    ));

    let subscription_service = Arc::new(
        SubscriptionService::new(
            subscriptions.clone(),
            identities,
            directory.clone(),
            clock.clone(),
        )
        .with_probe_timeout(config.http_timeout),
    );

    // Background watch system
    let stats = Arc::new(WatchStats::new());
    let watcher = Arc::new(SubscriptionWatcher::new(
        subscriptions.clone(),
        directory,
        Arc::new(dispatcher),
        clock.clone(),
        stats.clone(),
        Some(WatcherConfig {
            poll_interval: config.poll_interval,
            max_concurrent_probes: config.max_concurrent_probes,
            probe_timeout: config.http_timeout,
        }),
    ));
    let pruner = Arc::new(RetentionPruner::new(
        subscriptions,
        clock,
        stats.clone(),
        Some(PrunerConfig {
            prune_interval: config.prune_interval,
            retention: config.retention,
        }),
    ));
    let mut watch_manager = WatchManager::new(watcher, pruner, stats.clone());
    watch_manager.start();

    log::info!("🌐 Server will be available at: http://{}", config.bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(subscription_service.clone()))
            .app_data(web::Data::from(stats.clone()))
            .wrap(Logger::default())
            .route(
                "/health",
                web::get().to(|| async { HttpResponse::Ok().body("OK") }),
            )
            .route("/api/health", web::get().to(api_health))
            // Subscription routes (require a resolved user context)
            .service(
                web::scope("/api/subscriptions")
                    .wrap(UserContextMiddleware::new(sessions.clone()))
                    .route("", web::get().to(get_subscriptions))
                    .route("/subscribe", web::post().to(subscribe))
                    .route("/unsubscribe", web::post().to(unsubscribe)),
            )
            // Operator routes
            .service(
                web::scope("/api/watch")
                    .wrap(UserContextMiddleware::new(sessions.clone()))
                    .route("/stats", web::get().to(watch_stats)),
            )
    })
    .bind(&config.bind_addr)
    .with_context(|| format!("failed to bind {}", config.bind_addr))?
    .run();

    let result = server.await;

    let final_stats = watch_manager.stats();
    watch_manager.stop().await;
    log::info!(
        "👋 Shut down after {} ticks, {} restaurants opened, {} subscriptions pruned",
        final_stats.ticks,
        final_stats.opened,
        final_stats.pruned
    );

    result.context("server error")
}

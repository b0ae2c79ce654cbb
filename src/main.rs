use std::{error::Error, net::SocketAddr, sync::Arc};

use db::{get_db_pool, init_schema};
use notify::{LogMailer, Mailer, Notifier, SmtpMailer};
use scheduler::{ReminderScheduler, RetentionSweeper, Scheduler};
use tokio::net::TcpListener;

mod api;
mod auth;
mod clock;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod notify;
mod photos;
mod ratelimit;
mod reservations;
mod scheduler;
mod slots;

extern crate pretty_env_logger;
#[macro_use] extern crate log;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    pretty_env_logger::init();
    let config = config::load()?;

    let pool = get_db_pool(&config.database_url).await?;
    init_schema(&pool).await?;
    info!("store ready at {}", config.database_url);

    match (&config.admin_username, &config.admin_password) {
        (Some(username), Some(password)) => {
            auth::seed_admin(&pool, username, password).await?;
            info!("admin credential for {} is up to date", username);
        }
        _ => warn!("ADMIN_USERNAME/ADMIN_PASSWORD not set, admin login only works for existing credentials"),
    }

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp, &config.shop_name)?),
        None => {
            warn!("EMAIL_USER/EMAIL_PASS not set, emails will only be logged");
            Arc::new(LogMailer)
        }
    };

    let notifier = match &config.operator_email {
        Some(operator) => {
            let (notifier, rx) = Notifier::channel();
            notify::spawn_dispatcher(rx, mailer.clone(), operator.clone());
            notifier
        }
        None => {
            info!("OPERATOR_EMAIL not set, new reservations will not be forwarded");
            Notifier::disabled()
        }
    };

    let clock = clock::ShopClock::system(config.shop_timezone);
    info!(
        "shop time is {} ({})",
        clock.now_string(),
        clock.timezone()
    );

    let scheduler = Scheduler::new()
        .every(
            config.retention_interval,
            Arc::new(RetentionSweeper::new(pool.clone(), clock.clone())),
        )
        .every(
            config.reminder.interval,
            Arc::new(ReminderScheduler::new(
                pool.clone(),
                clock.clone(),
                mailer,
                config.reminder,
                config.shop_name.clone(),
            )),
        )
        .start();

    let state = api::AppState {
        pool,
        clock,
        hours: config.opening_hours,
        notifier,
        sessions: auth::SessionStore::new(
            Arc::new(clock::SystemClock),
            chrono::Duration::hours(config.admin_session_ttl_hours),
        ),
        photos: photos::PhotoStorage::new(&config.uploads_dir, config.public_base_url.clone()),
        operator_email: config.operator_email.clone(),
        max_upload_bytes: config.max_upload_bytes,
        limiter: ratelimit::RateLimiter::new(
            Arc::new(clock::SystemClock),
            config.rate_limit_max_requests,
            chrono::Duration::from_std(config.rate_limit_window)?,
        ),
    };

    let listener = TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!("listening on {}", listener.local_addr()?);
    let app = api::router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    info!("bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("could not listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

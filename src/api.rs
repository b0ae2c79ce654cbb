//! HTTP surface: shared state, routes and request logging.

use std::time::Instant;

use axum::extract::{DefaultBodyLimit, FromRef, Request};
use axum::http::{header, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::auth::SessionStore;
use crate::clock::ShopClock;
use crate::handlers;
use crate::notify::Notifier;
use crate::photos::PhotoStorage;
use crate::ratelimit::{self, RateLimiter};
use crate::slots::OpeningHours;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub clock: ShopClock,
    pub hours: OpeningHours,
    pub notifier: Notifier,
    pub sessions: SessionStore,
    pub photos: PhotoStorage,
    pub operator_email: Option<String>,
    pub max_upload_bytes: usize,
    pub limiter: RateLimiter,
}

impl FromRef<AppState> for SessionStore {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

pub fn router(state: AppState) -> Router {
    // every file of a full batch plus room for the form framing
    let upload_limit =
        DefaultBodyLimit::max(state.max_upload_bytes * handlers::MAX_FILES_PER_UPLOAD + 64 * 1024);
    let uploads = ServeDir::new(state.photos.uploads_dir());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/auth/login", post(handlers::login))
        .route(
            "/api/reservations",
            get(handlers::list_reservations).post(handlers::create_reservation),
        )
        .route("/api/reservations/admin", post(handlers::create_admin_reservation))
        .route("/api/reservations/date/:date", get(handlers::reservations_on_date))
        .route("/api/reservations/slots/:date", get(handlers::slots_on_date))
        .route(
            "/api/reservations/:id",
            get(handlers::get_reservation).delete(handlers::delete_reservation),
        )
        .route("/api/photos", get(handlers::list_photos))
        .route(
            "/api/photos/before",
            post(handlers::upload_before).layer(upload_limit.clone()),
        )
        .route(
            "/api/photos/after",
            post(handlers::upload_after).layer(upload_limit),
        )
        .route(
            "/api/photos/:id",
            get(handlers::get_photo).delete(handlers::delete_photo),
        )
        .nest_service("/uploads", uploads)
        .layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            ratelimit::limit_requests,
        ))
        .layer(middleware::from_fn(log_requests))
        .layer(cors)
        .with_state(state)
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    let status = response.status();
    if status.is_server_error() {
        warn!("{} {} -> {} in {:?}", method, path, status.as_u16(), started.elapsed());
    } else {
        info!("{} {} -> {} in {:?}", method, path, status.as_u16(), started.elapsed());
    }
    response
}

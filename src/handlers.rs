use axum::extract::rejection::JsonRejection;
use axum::extract::{multipart::MultipartError, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::AppState;
use crate::auth::{self, AdminSession};
use crate::clock;
use crate::error::{AppError, AppResult};
use crate::models::PhotoType;
use crate::notify::Notification;
use crate::photos;
use crate::reservations::{self, BookingRequest};
use crate::slots;

pub const MAX_FILES_PER_UPLOAD: usize = 10;
const PLACEHOLDER_NAME: &str = "Rezervuota";
const PLACEHOLDER_PHONE: &str = "00000000";
const PLACEHOLDER_EMAIL: &str = "rezervuota@localhost";

fn payload<T>(body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    body.map(|Json(value)| value)
        .map_err(|e| AppError::Validation(e.body_text()))
}

fn date_param(raw: &str) -> AppResult<chrono::NaiveDate> {
    clock::parse_date(raw)
        .ok_or_else(|| AppError::Validation("Invalid date format. Use YYYY-MM-DD".to_string()))
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "OK", "database": "connected" }))),
        Err(e) => {
            error!("health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "ERROR", "database": "disconnected" })),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let request = payload(body)?;
    let (Some(username), Some(password)) = (request.username, request.password) else {
        return Err(AppError::Validation("Username and password are required".to_string()));
    };
    if !auth::verify_credentials(&state.pool, &username, &password).await? {
        warn!("failed admin login for {:?}", username);
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }
    let token = state.sessions.issue().await;
    info!("admin {} logged in", username);
    Ok(Json(json!({ "success": true, "token": token, "message": "Login successful" })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceQuery {
    service_type: Option<String>,
}

impl ServiceQuery {
    fn service_type(&self) -> Option<&str> {
        self.service_type.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

pub async fn reservations_on_date(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Query(query): Query<ServiceQuery>,
) -> AppResult<Json<Value>> {
    let day = date_param(&date)?;
    let taken = reservations::taken_on(&state.pool, day, query.service_type()).await?;
    Ok(Json(json!({ "success": true, "date": date, "reservations": taken })))
}

pub async fn slots_on_date(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Query(query): Query<ServiceQuery>,
) -> AppResult<Json<Value>> {
    let day = date_param(&date)?;
    let service_type = query
        .service_type()
        .ok_or_else(|| AppError::Validation("service_type is required".to_string()))?;
    let taken: Vec<String> = reservations::taken_on(&state.pool, day, Some(service_type))
        .await?
        .into_iter()
        .map(|t| t.reservation_date)
        .collect();
    let grid = slots::day_slots(&state.hours, day, &taken, state.clock.now());
    Ok(Json(json!({
        "success": true,
        "date": date,
        "service_type": service_type,
        "slots": grid,
    })))
}

pub async fn create_reservation(
    State(state): State<AppState>,
    body: Result<Json<BookingRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let request = payload(body)?;
    let new = reservations::validate_booking(&request, &state.hours, &state.clock)?;
    let reservation = reservations::book(&state.pool, &state.clock, &new).await?;
    info!(
        "reservation #{} booked for {} ({})",
        reservation.id, reservation.reservation_date, reservation.service_type
    );
    state
        .notifier
        .notify(Notification::NewReservation(reservation.clone()));
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Reservation created successfully",
            "data": reservation,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct QuickBookingRequest {
    reservation_date: Option<String>,
    service_type: Option<String>,
    additional_info: Option<String>,
}

/// Blocks a slot from the admin panel with placeholder contact details.
pub async fn create_admin_reservation(
    State(state): State<AppState>,
    _admin: AdminSession,
    body: Result<Json<QuickBookingRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let quick = payload(body)?;
    let request = BookingRequest {
        name: Some(PLACEHOLDER_NAME.to_string()),
        email: Some(
            state
                .operator_email
                .clone()
                .unwrap_or_else(|| PLACEHOLDER_EMAIL.to_string()),
        ),
        phone: Some(PLACEHOLDER_PHONE.to_string()),
        reservation_date: quick.reservation_date,
        service_type: quick.service_type,
        additional_info: quick.additional_info,
    };
    let mut new = reservations::validate_booking(&request, &state.hours, &state.clock)?;
    new.send_reminder = false;
    let reservation = reservations::book(&state.pool, &state.clock, &new).await?;
    info!("admin blocked {} for {}", reservation.reservation_date, reservation.service_type);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Reservation created successfully",
            "data": reservation,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    page: Option<i64>,
    limit: Option<i64>,
}

pub async fn list_reservations(
    State(state): State<AppState>,
    _admin: AdminSession,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Value>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let (data, total) = reservations::list(&state.pool, page, limit).await?;
    Ok(Json(json!({
        "success": true,
        "data": data,
        "total": total,
        "currentPage": page,
        "totalPages": (total + limit - 1) / limit,
    })))
}

pub async fn get_reservation(
    State(state): State<AppState>,
    _admin: AdminSession,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let reservation = reservations::find(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation not found".to_string()))?;
    Ok(Json(json!({ "success": true, "data": reservation })))
}

pub async fn delete_reservation(
    State(state): State<AppState>,
    _admin: AdminSession,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let deleted = reservations::delete(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation not found".to_string()))?;
    info!("reservation #{} deleted by admin", id);
    Ok(Json(json!({
        "success": true,
        "message": "Reservation deleted successfully",
        "data": deleted,
    })))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Upload is too large".to_string())
    } else {
        AppError::Validation(e.body_text())
    }
}

pub async fn upload_before(
    State(state): State<AppState>,
    _admin: AdminSession,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    upload(state, PhotoType::Before, multipart).await
}

pub async fn upload_after(
    State(state): State<AppState>,
    _admin: AdminSession,
    multipart: Multipart,
) -> AppResult<Json<Value>> {
    upload(state, PhotoType::After, multipart).await
}

async fn upload(
    state: AppState,
    photo_type: PhotoType,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let mut caption = None;
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "caption" => {
                let text = field.text().await.map_err(multipart_error)?;
                caption = Some(text.trim().to_string()).filter(|c| !c.is_empty());
            }
            "photos" => {
                if files.len() == MAX_FILES_PER_UPLOAD {
                    return Err(AppError::Validation(format!(
                        "At most {MAX_FILES_PER_UPLOAD} photos per upload"
                    )));
                }
                let is_image = field
                    .content_type()
                    .is_some_and(|ct| ct.starts_with("image/"));
                if !is_image {
                    return Err(AppError::Validation("Only image files are allowed!".to_string()));
                }
                let file_name = field.file_name().unwrap_or("photo").to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if bytes.len() > state.max_upload_bytes {
                    return Err(AppError::PayloadTooLarge(format!(
                        "{file_name} exceeds {} bytes",
                        state.max_upload_bytes
                    )));
                }
                files.push((file_name, bytes));
            }
            other => debug!("ignoring multipart field {:?}", other),
        }
    }
    if files.is_empty() {
        return Err(AppError::Validation("No files uploaded".to_string()));
    }

    let mut urls = Vec::with_capacity(files.len());
    for (file_name, bytes) in &files {
        match state.photos.save("photos", file_name, bytes).await {
            Ok(url) => urls.push(url),
            Err(e) => {
                discard(&state, &urls).await;
                return Err(AppError::Internal(format!("could not store {file_name}: {e}")));
            }
        }
    }
    let stored = match photos::insert_all(
        &state.pool,
        caption.as_deref(),
        &urls,
        photo_type,
        &state.clock.now_string(),
    )
    .await
    {
        Ok(stored) => stored,
        Err(e) => {
            discard(&state, &urls).await;
            return Err(e.into());
        }
    };
    let stored: Vec<_> = stored.into_iter().map(|p| state.photos.publish(p)).collect();
    info!("{} {} photos uploaded", stored.len(), photo_type.as_str());
    Ok(Json(json!({
        "success": true,
        "message": format!("{} photos uploaded successfully", stored.len()),
        "photos": stored,
    })))
}

/// Removes the files of a batch that did not make it into the store.
async fn discard(state: &AppState, urls: &[String]) {
    for url in urls {
        state.photos.remove(url).await;
    }
}

#[derive(Debug, Deserialize)]
pub struct PhotoQuery {
    #[serde(rename = "type")]
    photo_type: Option<PhotoType>,
}

pub async fn list_photos(
    State(state): State<AppState>,
    Query(query): Query<PhotoQuery>,
) -> AppResult<Json<Value>> {
    let data: Vec<_> = photos::list(&state.pool, query.photo_type)
        .await?
        .into_iter()
        .map(|photo| state.photos.publish(photo))
        .collect();
    Ok(Json(json!({ "success": true, "photos": data })))
}

pub async fn get_photo(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let photo = photos::find(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Photo not found".to_string()))?;
    Ok(Json(json!({ "success": true, "photo": state.photos.publish(photo) })))
}

pub async fn delete_photo(
    State(state): State<AppState>,
    _admin: AdminSession,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let photo = photos::delete(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Photo not found".to_string()))?;
    state.photos.remove(&photo.photo_url).await;
    Ok(Json(json!({ "success": true, "message": "Photo deleted successfully" })))
}

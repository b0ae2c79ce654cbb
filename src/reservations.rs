//! Reservation persistence: availability, the booking transaction, admin
//! listing and the queries behind retention and reminders.

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Deserialize;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::clock::{self, ShopClock};
use crate::db::{is_missing_table, is_unique_violation};
use crate::models::{NewReservation, Reservation, ServiceType, TakenSlot};
use crate::slots::{self, OpeningHours, Unbookable};

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),
    #[error("This time slot is already reserved for this service")]
    Conflict,
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Booking request as it arrives on the wire. Every field is optional so
/// that a missing one is reported as a validation failure.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BookingRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub reservation_date: Option<String>,
    pub service_type: Option<String>,
    pub additional_info: Option<String>,
}

fn required(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn looks_like_email(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && !domain.is_empty() && !email.contains(char::is_whitespace)
        }
        _ => false,
    }
}

/// The pure half of a booking: field presence, formats and slot rules.
pub fn validate_booking(
    request: &BookingRequest,
    hours: &OpeningHours,
    clock: &ShopClock,
) -> Result<NewReservation, BookingError> {
    let (Some(name), Some(email), Some(phone), Some(reservation_date), Some(service_type)) = (
        required(&request.name),
        required(&request.email),
        required(&request.phone),
        required(&request.reservation_date),
        required(&request.service_type),
    ) else {
        return Err(BookingError::Validation(
            "Name, email, phone, reservation_date, and service_type are required".to_string(),
        ));
    };

    if !looks_like_email(&email) {
        return Err(BookingError::Validation(format!("Invalid email address: {email}")));
    }
    let service_type = ServiceType::parse(&service_type)
        .ok_or_else(|| BookingError::Validation(format!("Unknown service type: {service_type}")))?;
    let instant = clock::parse_civil(&reservation_date).ok_or_else(|| {
        BookingError::Validation("reservation_date must be formatted as YYYY-MM-DD HH:MM:SS".to_string())
    })?;

    match slots::check_bookable(hours, instant, clock.now()) {
        Ok(()) => {}
        Err(Unbookable::OffGrid) => {
            return Err(BookingError::Validation(format!(
                "{reservation_date} is outside the bookable hours"
            )))
        }
        Err(Unbookable::Past) => {
            return Err(BookingError::Validation(format!(
                "{reservation_date} is in the past"
            )))
        }
    }

    Ok(NewReservation {
        name,
        email,
        phone,
        reservation_date: clock::format_civil(&instant),
        service_type,
        additional_info: required(&request.additional_info),
        send_reminder: true,
    })
}

/// Atomically checks the slot and inserts the reservation.
///
/// The existence check and the insert are one statement, and the unique
/// index on `(reservation_date, service_type)` rejects whatever slips past
/// it, so two concurrent attempts on one slot cannot both commit.
pub async fn book(
    pool: &SqlitePool,
    clock: &ShopClock,
    new: &NewReservation,
) -> Result<Reservation, BookingError> {
    let inserted = sqlx::query_as::<_, Reservation>(
        r#"
        INSERT INTO reservations
            (name, email, phone, reservation_date, service_type, additional_info, created_at,
             reminder_sent, send_reminder)
        SELECT ?, ?, ?, ?, ?, ?, ?, 0, ?
        WHERE NOT EXISTS (
            SELECT 1 FROM reservations WHERE reservation_date = ? AND service_type = ?
        )
        RETURNING *
        "#,
    )
    .bind(&new.name)
    .bind(&new.email)
    .bind(&new.phone)
    .bind(&new.reservation_date)
    .bind(new.service_type.code())
    .bind(&new.additional_info)
    .bind(clock.now_string())
    .bind(new.send_reminder)
    .bind(&new.reservation_date)
    .bind(new.service_type.code())
    .fetch_optional(pool)
    .await;

    match inserted {
        Ok(Some(reservation)) => Ok(reservation),
        Ok(None) => Err(BookingError::Conflict),
        Err(e) if is_unique_violation(&e) => Err(BookingError::Conflict),
        Err(e) => Err(BookingError::Store(e)),
    }
}

/// Instants already taken on `date`, optionally for one service type only.
pub async fn taken_on(
    pool: &SqlitePool,
    date: NaiveDate,
    service_type: Option<&str>,
) -> Result<Vec<TakenSlot>, sqlx::Error> {
    let from = clock::format_civil(&date.and_time(NaiveTime::MIN));
    let until = clock::format_civil(&(date + Duration::days(1)).and_time(NaiveTime::MIN));

    let mut sql = String::from(
        "SELECT reservation_date, service_type FROM reservations \
         WHERE reservation_date >= ? AND reservation_date < ?",
    );
    if service_type.is_some() {
        sql.push_str(" AND service_type = ?");
    }
    sql.push_str(" ORDER BY reservation_date, service_type");

    let mut query = sqlx::query_as::<_, TakenSlot>(&sql).bind(from).bind(until);
    if let Some(service_type) = service_type {
        query = query.bind(service_type);
    }
    query.fetch_all(pool).await
}

pub async fn list(
    pool: &SqlitePool,
    page: i64,
    limit: i64,
) -> Result<(Vec<Reservation>, i64), sqlx::Error> {
    let offset = (page.max(1) - 1).saturating_mul(limit);
    let reservations = sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reservations")
        .fetch_one(pool)
        .await?;
    Ok((reservations, total))
}

pub async fn find(pool: &SqlitePool, id: i64) -> Result<Option<Reservation>, sqlx::Error> {
    sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Deletes one reservation whatever its temporal state, returning it.
pub async fn delete(pool: &SqlitePool, id: i64) -> Result<Option<Reservation>, sqlx::Error> {
    sqlx::query_as::<_, Reservation>("DELETE FROM reservations WHERE id = ? RETURNING *")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Deletes every reservation at or before `now`. A missing table counts as
/// nothing to delete.
pub async fn delete_elapsed(pool: &SqlitePool, now: &str) -> Result<u64, sqlx::Error> {
    match sqlx::query("DELETE FROM reservations WHERE reservation_date <= ?")
        .bind(now)
        .execute(pool)
        .await
    {
        Ok(done) => Ok(done.rows_affected()),
        Err(e) if is_missing_table(&e) => {
            warn!("reservations table does not exist yet, nothing to sweep");
            Ok(0)
        }
        Err(e) => Err(e),
    }
}

/// Reservations inside `[from, until]` that are owed a reminder and have
/// not had one yet.
pub async fn due_for_reminder(
    pool: &SqlitePool,
    from: &str,
    until: &str,
) -> Result<Vec<Reservation>, sqlx::Error> {
    match sqlx::query_as::<_, Reservation>(
        r#"
        SELECT * FROM reservations
        WHERE reservation_date >= ?
          AND reservation_date <= ?
          AND reminder_sent = 0
          AND send_reminder = 1
        ORDER BY reservation_date, id
        "#,
    )
    .bind(from)
    .bind(until)
    .fetch_all(pool)
    .await
    {
        Ok(rows) => Ok(rows),
        Err(e) if is_missing_table(&e) => {
            warn!("reservations table does not exist yet, skipping reminders");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Flips `reminder_sent` from false to true. Returns whether this call did
/// the flip; the flag never goes back.
pub async fn mark_reminder_sent(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let done = sqlx::query("UPDATE reservations SET reminder_sent = 1 WHERE id = ? AND reminder_sent = 0")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() == 1)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn request(instant: &str, service: &str) -> BookingRequest {
        BookingRequest {
            name: Some("Jonas Jonaitis".to_string()),
            email: Some("jonas@example.com".to_string()),
            phone: Some("+37060000000".to_string()),
            reservation_date: Some(instant.to_string()),
            service_type: Some(service.to_string()),
            additional_info: None,
        }
    }

    pub fn new_reservation(instant: &str, service: &str) -> NewReservation {
        NewReservation {
            name: "Jonas Jonaitis".to_string(),
            email: "jonas@example.com".to_string(),
            phone: "+37060000000".to_string(),
            reservation_date: instant.to_string(),
            service_type: ServiceType::parse(service).unwrap(),
            additional_info: None,
            send_reminder: true,
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Reservation {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub reservation_date: String,
    pub service_type: String,
    pub additional_info: Option<String>,
    pub created_at: String,
    pub reminder_sent: bool,
    /// False for slots blocked from the admin panel; those carry no customer.
    pub send_reminder: bool,
}

/// A taken (instant, service) pair as exposed by the availability query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct TakenSlot {
    pub reservation_date: String,
    pub service_type: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Photo {
    pub id: i64,
    pub caption: Option<String>,
    pub photo_url: String,
    pub photo_type: String,
    pub created_at: String,
}

#[derive(Debug, FromRow)]
pub struct AdminCredential {
    pub username: String,
    pub password_hash: String,
}

/// A validated booking request, ready for the store.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub reservation_date: String,
    pub service_type: ServiceType,
    pub additional_info: Option<String>,
    pub send_reminder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceType {
    WheelBalancing,
    WheelAlignment,
    OtherServices,
    Custom(String),
}

impl ServiceType {
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        let valid = !code.is_empty()
            && code.len() <= 64
            && code
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !valid {
            return None;
        }
        Some(match code {
            "ratu_balansavimas" => ServiceType::WheelBalancing,
            "ratu_suvedimas" => ServiceType::WheelAlignment,
            "kitos_paslaugos" => ServiceType::OtherServices,
            other => ServiceType::Custom(other.to_string()),
        })
    }

    pub fn code(&self) -> &str {
        match self {
            ServiceType::WheelBalancing => "ratu_balansavimas",
            ServiceType::WheelAlignment => "ratu_suvedimas",
            ServiceType::OtherServices => "kitos_paslaugos",
            ServiceType::Custom(code) => code,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ServiceType::WheelBalancing => "Ratų balansavimas",
            ServiceType::WheelAlignment => "3D ratų suvedimas",
            ServiceType::OtherServices => "Kitos paslaugos",
            ServiceType::Custom(code) => code,
        }
    }

    /// Human label for a stored code, falling back to the code itself.
    pub fn label_for(code: &str) -> String {
        ServiceType::parse(code)
            .map(|s| s.label().to_string())
            .unwrap_or_else(|| code.to_string())
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoType {
    Before,
    After,
}

impl PhotoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoType::Before => "before",
            PhotoType::After => "after",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_service_codes_round_trip() {
        for code in ["ratu_balansavimas", "ratu_suvedimas", "kitos_paslaugos"] {
            let service = ServiceType::parse(code).unwrap();
            assert!(!matches!(service, ServiceType::Custom(_)));
            assert_eq!(service.code(), code);
        }
    }

    #[test]
    fn free_form_codes_are_custom() {
        assert_eq!(
            ServiceType::parse(" padangu-montavimas "),
            Some(ServiceType::Custom("padangu-montavimas".to_string()))
        );
        assert_eq!(ServiceType::label_for("padangu-montavimas"), "padangu-montavimas");
        assert_eq!(ServiceType::label_for("ratu_suvedimas"), "3D ratų suvedimas");
    }

    #[test]
    fn malformed_codes_are_rejected() {
        assert_eq!(ServiceType::parse(""), None);
        assert_eq!(ServiceType::parse("   "), None);
        assert_eq!(ServiceType::parse("Ratu Suvedimas"), None);
        assert_eq!(ServiceType::parse(&"x".repeat(65)), None);
    }
}

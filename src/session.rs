//! # Patient Session Module
//!
//! Holds at most one registered patient. While no session is active the
//! pipeline still publishes vitals, but logging and SMS stay off and the
//! status reads "No Patient".
//!
//! Registration payloads use the dashboard's camelCase keys:
//! `{"name","age","gender","contact","emergencyContact","medicalConditions","replace"}`.

use crate::error::RegistrationError;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Fields submitted by the operator
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
    #[serde(default, alias = "medicalNotes")]
    pub medical_conditions: Option<String>,
    /// Replace an active session instead of rejecting
    #[serde(default)]
    pub replace: bool,
}

impl Registration {
    pub fn from_json(payload: &str) -> Result<Self, RegistrationError> {
        serde_json::from_str(payload).map_err(|e| RegistrationError::InvalidJson(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientSession {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub contact: String,
    pub emergency_contact: String,
    pub medical_notes: String,
    pub started_at_ms: u64,
    pub registered: bool,
}

impl PatientSession {
    /// Card path of this session's CSV log
    pub fn log_path(&self) -> String {
        format!("/{}_{}.csv", self.id, self.started_at_ms / 1000)
    }
}

/// `{"success":..,"patientId":..,"message":..}` reply to a registration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    pub message: String,
}

impl RegistrationResponse {
    pub fn from_result(result: &Result<String, RegistrationError>) -> Self {
        match result {
            Ok(id) => Self {
                success: true,
                patient_id: Some(id.clone()),
                message: "Patient registered successfully".to_string(),
            },
            Err(e) => Self {
                success: false,
                patient_id: None,
                message: e.to_string(),
            },
        }
    }
}

/// `"VCR" + uptime ms + three digits in [100, 999]`
pub fn generate_patient_id(now_ms: u64, rng: &mut dyn RngCore) -> String {
    format!("VCR{}{}", now_ms, rng.gen_range(100..=999))
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, RegistrationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(RegistrationError::MissingField(field)),
    }
}

fn optional(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

#[derive(Debug, Default)]
pub struct SessionManager {
    active: Option<PatientSession>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self { active: None }
    }

    /// Validate and install a session, returning its ID
    ///
    /// On error nothing changes.
    pub fn register(
        &mut self,
        registration: &Registration,
        now_ms: u64,
        rng: &mut dyn RngCore,
    ) -> Result<String, RegistrationError> {
        let name = required(&registration.name, "name")?;
        let age = registration.age.ok_or(RegistrationError::MissingField("age"))?;
        if !(0..=150).contains(&age) {
            return Err(RegistrationError::InvalidAge(age));
        }
        let gender = required(&registration.gender, "gender")?;

        if let Some(active) = &self.active {
            if !registration.replace {
                return Err(RegistrationError::AlreadyActive {
                    id: active.id.clone(),
                });
            }
            log::info!("Replacing session {}", active.id);
        }

        // A replacement in the same millisecond must not reuse the old ID.
        let mut id = generate_patient_id(now_ms, rng);
        while self.active.as_ref().is_some_and(|active| active.id == id) {
            id = generate_patient_id(now_ms, rng);
        }

        let session = PatientSession {
            id,
            name,
            age: age as u32,
            gender,
            contact: optional(&registration.contact),
            emergency_contact: optional(&registration.emergency_contact),
            medical_notes: optional(&registration.medical_conditions),
            started_at_ms: now_ms,
            registered: true,
        };
        log::info!(
            "Patient registered: {} ({}, {}) as {}",
            session.name,
            session.age,
            session.gender,
            session.id
        );
        let id = session.id.clone();
        self.active = Some(session);
        Ok(id)
    }

    pub fn get(&self) -> Option<&PatientSession> {
        self.active.as_ref()
    }

    pub fn is_registered(&self) -> bool {
        self.active.is_some()
    }

    /// End the active session, if any
    pub fn end(&mut self) -> Option<PatientSession> {
        let ended = self.active.take();
        if let Some(session) = &ended {
            log::info!("Session {} ended", session.id);
        }
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn payload() -> Registration {
        Registration {
            name: Some("A".to_string()),
            age: Some(30),
            gender: Some("F".to_string()),
            emergency_contact: Some("+100".to_string()),
            ..Registration::default()
        }
    }

    #[test]
    fn test_register_and_end() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut sessions = SessionManager::new();
        let id = sessions.register(&payload(), 1000, &mut rng).unwrap();

        let session = sessions.get().unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.started_at_ms, 1000);
        assert_eq!(session.emergency_contact, "+100");
        assert_eq!(session.contact, "");
        assert_eq!(session.log_path(), format!("/{}_1.csv", id));

        assert!(sessions.end().is_some());
        assert!(!sessions.is_registered());
        assert!(sessions.end().is_none());
    }

    #[test]
    fn test_patient_id_format() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..100 {
            let id = generate_patient_id(12345, &mut rng);
            let suffix: u32 = id.strip_prefix("VCR12345").unwrap().parse().unwrap();
            assert!((100..=999).contains(&suffix));
        }
    }

    #[test]
    fn test_double_registration_rejected_without_replace() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut sessions = SessionManager::new();
        let first = sessions.register(&payload(), 1000, &mut rng).unwrap();

        let err = sessions.register(&payload(), 2000, &mut rng).unwrap_err();
        assert_eq!(err, RegistrationError::AlreadyActive { id: first.clone() });
        assert_eq!(sessions.get().unwrap().id, first);

        let replacement = Registration {
            replace: true,
            ..payload()
        };
        let second = sessions.register(&replacement, 2000, &mut rng).unwrap();
        assert_ne!(first, second);
        assert_eq!(sessions.get().unwrap().id, second);
    }

    #[test]
    fn test_replacement_in_same_millisecond_gets_new_id() {
        // This seed draws the same suffix twice in a row
        let mut rng = StdRng::seed_from_u64(1712);
        let mut sessions = SessionManager::new();
        let replacement = Registration {
            replace: true,
            ..payload()
        };

        let first = sessions.register(&replacement, 1000, &mut rng).unwrap();
        let second = sessions.register(&replacement, 1000, &mut rng).unwrap();
        assert_ne!(first, second);
        assert!(second.starts_with("VCR1000"));
        assert_ne!(
            sessions.get().unwrap().log_path(),
            format!("/{}_1.csv", first)
        );
    }

    #[test]
    fn test_invalid_registrations_leave_state_unchanged() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut sessions = SessionManager::new();

        let no_name = Registration {
            name: Some("  ".to_string()),
            ..payload()
        };
        assert_eq!(
            sessions.register(&no_name, 0, &mut rng),
            Err(RegistrationError::MissingField("name"))
        );

        let bad_age = Registration {
            age: Some(-3),
            ..payload()
        };
        assert_eq!(
            sessions.register(&bad_age, 0, &mut rng),
            Err(RegistrationError::InvalidAge(-3))
        );

        let no_gender = Registration {
            gender: None,
            ..payload()
        };
        assert_eq!(
            sessions.register(&no_gender, 0, &mut rng),
            Err(RegistrationError::MissingField("gender"))
        );
        assert!(!sessions.is_registered());
    }

    #[test]
    fn test_registration_from_dashboard_json() {
        let json = r#"{"name":"Amina","age":41,"gender":"F","emergencyContact":"+255700000000","medicalConditions":"asthma"}"#;
        let registration = Registration::from_json(json).unwrap();
        assert_eq!(registration.emergency_contact.as_deref(), Some("+255700000000"));
        assert_eq!(registration.medical_conditions.as_deref(), Some("asthma"));
        assert!(!registration.replace);

        assert!(matches!(
            Registration::from_json("{not json"),
            Err(RegistrationError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_registration_response_json() {
        let ok = RegistrationResponse::from_result(&Ok("VCR1000123".to_string()));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["patientId"], "VCR1000123");

        let err = RegistrationResponse::from_result(&Err(RegistrationError::MissingField("age")));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("patientId").is_none());
    }
}

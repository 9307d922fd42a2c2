use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Jsonb;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::schema::patients;

pub const ADMIN_ROLE: &str = "admin";

// Stored as a JSONB document inside the patient row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, AsExpression, FromSqlRow)]
#[diesel(sql_type = Jsonb)]
pub struct EmergencyContact {
    #[validate(length(min = 1, message = "emergency contact name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "emergency contact relationship is required"))]
    pub relationship: String,
    #[validate(length(min = 1, message = "emergency contact phone is required"))]
    pub phone: String,
}

impl FromSql<Jsonb, Pg> for EmergencyContact {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = <serde_json::Value as FromSql<Jsonb, Pg>>::from_sql(bytes)?;
        Ok(serde_json::from_value(value)?)
    }
}

impl ToSql<Jsonb, Pg> for EmergencyContact {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let value = serde_json::to_value(self)?;
        <serde_json::Value as ToSql<Jsonb, Pg>>::to_sql(&value, &mut out.reborrow())
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = patients)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub full_name: String,
    pub age: i32,
    pub gender: String,
    pub contact_number: String,
    pub email: Option<String>,
    pub address: String,
    pub chief_complaint: String,
    pub medical_history: Option<String>,
    pub allergies: Option<String>,
    pub current_medications: Option<String>,
    pub emergency_contact: EmergencyContact,
    pub consent_given: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of a patient submission, before the server assigns identity and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    #[validate(length(min = 1, message = "full name is required"))]
    pub full_name: String,
    #[validate(range(min = 0, max = 150, message = "age must be between 0 and 150"))]
    pub age: i32,
    #[validate(length(min = 1, message = "gender is required"))]
    pub gender: String,
    #[validate(length(min = 1, message = "contact number is required"))]
    pub contact_number: String,
    #[serde(default)]
    pub email: Option<String>,
    #[validate(length(min = 1, message = "address is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "chief complaint is required"))]
    pub chief_complaint: String,
    #[serde(default)]
    pub medical_history: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
    #[serde(default)]
    pub current_medications: Option<String>,
    #[validate(nested)]
    pub emergency_contact: EmergencyContact,
    #[serde(default)]
    pub consent_given: bool,
}

impl NewPatient {
    /// Trims every text field and drops optional fields that end up empty.
    pub fn normalized(mut self) -> Self {
        trim_in_place(&mut self.full_name);
        trim_in_place(&mut self.gender);
        trim_in_place(&mut self.contact_number);
        trim_in_place(&mut self.address);
        trim_in_place(&mut self.chief_complaint);
        trim_in_place(&mut self.emergency_contact.name);
        trim_in_place(&mut self.emergency_contact.relationship);
        trim_in_place(&mut self.emergency_contact.phone);
        self.email = non_empty(self.email);
        self.medical_history = non_empty(self.medical_history);
        self.allergies = non_empty(self.allergies);
        self.current_medications = non_empty(self.current_medications);
        self
    }

    pub fn to_patient(self, now: DateTime<Utc>) -> Patient {
        Patient {
            id: Uuid::new_v4(),
            full_name: self.full_name,
            age: self.age,
            gender: self.gender,
            contact_number: self.contact_number,
            email: self.email,
            address: self.address,
            chief_complaint: self.chief_complaint,
            medical_history: self.medical_history,
            allergies: self.allergies,
            current_medications: self.current_medications,
            emergency_contact: self.emergency_contact,
            consent_given: self.consent_given,
            created_at: now,
            updated_at: now,
        }
    }
}

fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminUser {
    pub username: String,
    pub role: String,
}

#[cfg(test)]
pub(crate) fn sample_new_patient() -> NewPatient {
    NewPatient {
        full_name: "Asha Verma".to_string(),
        age: 34,
        gender: "Female".to_string(),
        contact_number: "555-0100".to_string(),
        email: Some("asha@example.com".to_string()),
        address: "12 Lake Road".to_string(),
        chief_complaint: "Persistent cough".to_string(),
        medical_history: None,
        allergies: Some("Penicillin".to_string()),
        current_medications: None,
        emergency_contact: EmergencyContact {
            name: "Ravi Verma".to_string(),
            relationship: "Brother".to_string(),
            phone: "555-0101".to_string(),
        },
        consent_given: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_patient_is_valid() {
        assert!(sample_new_patient().validate().is_ok());
    }

    #[test]
    fn normalization_drops_blank_optionals_and_trims() {
        let mut input = sample_new_patient();
        input.full_name = "  Asha Verma ".to_string();
        input.email = Some("   ".to_string());
        input.medical_history = Some(String::new());

        let normalized = input.normalized();
        assert_eq!(normalized.full_name, "Asha Verma");
        assert_eq!(normalized.email, None);
        assert_eq!(normalized.medical_history, None);
        assert_eq!(normalized.allergies.as_deref(), Some("Penicillin"));
    }

    #[test]
    fn blank_required_field_fails_validation() {
        let mut input = sample_new_patient();
        input.chief_complaint = "   ".to_string();
        let errors = input.normalized().validate().unwrap_err();
        assert!(errors.field_errors().contains_key("chief_complaint"));
    }

    #[test]
    fn nested_emergency_contact_is_validated() {
        let mut input = sample_new_patient();
        input.emergency_contact.phone.clear();
        assert!(input.validate().is_err());
    }

    #[test]
    fn age_out_of_range_fails_validation() {
        let mut input = sample_new_patient();
        input.age = -1;
        assert!(input.validate().is_err());
    }

    #[test]
    fn patient_serializes_with_wire_names() {
        let patient = sample_new_patient().to_patient(Utc::now());
        let json = serde_json::to_value(&patient).unwrap();
        assert_eq!(json["_id"], patient.id.to_string());
        assert_eq!(json["fullName"], "Asha Verma");
        assert_eq!(json["emergencyContact"]["relationship"], "Brother");
        assert_eq!(json["consentGiven"], true);
        assert_eq!(json["createdAt"], json["updatedAt"]);
    }

    #[test]
    fn new_patient_parses_camel_case_body() {
        let body = serde_json::json!({
            "fullName": "Asha Verma",
            "age": 34,
            "gender": "Female",
            "contactNumber": "555-0100",
            "address": "12 Lake Road",
            "chiefComplaint": "Persistent cough",
            "emergencyContact": {"name": "Ravi", "relationship": "Brother", "phone": "555-0101"},
            "consentGiven": true
        });
        let parsed: NewPatient = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.email, None);
        assert!(parsed.consent_given);
    }
}

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::error::ApiError;
use crate::models::{EmergencyContact, NewPatient};

/// Flat, all-text form state shared by the manual form and the voice conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntakeDraft {
    #[serde(deserialize_with = "lenient_text")]
    pub full_name: String,
    #[serde(deserialize_with = "lenient_text")]
    pub age: String,
    #[serde(deserialize_with = "lenient_text")]
    pub gender: String,
    #[serde(deserialize_with = "lenient_text")]
    pub contact_number: String,
    #[serde(deserialize_with = "lenient_text")]
    pub email: String,
    #[serde(deserialize_with = "lenient_text")]
    pub address: String,
    #[serde(deserialize_with = "lenient_text")]
    pub chief_complaint: String,
    #[serde(deserialize_with = "lenient_text")]
    pub medical_history: String,
    #[serde(deserialize_with = "lenient_text")]
    pub allergies: String,
    #[serde(deserialize_with = "lenient_text")]
    pub current_medications: String,
    #[serde(deserialize_with = "lenient_text")]
    pub emergency_contact_name: String,
    #[serde(deserialize_with = "lenient_text")]
    pub emergency_contact_relationship: String,
    #[serde(deserialize_with = "lenient_text")]
    pub emergency_contact_phone: String,
}

/// Reviewed draft plus the consent checkbox.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeSubmission {
    #[serde(flatten)]
    pub draft: IntakeDraft,
    #[serde(default)]
    pub consent_given: bool,
}

impl IntakeDraft {
    fn required(&self) -> [(&'static str, &str); 9] {
        [
            ("fullName", self.full_name.as_str()),
            ("age", self.age.as_str()),
            ("gender", self.gender.as_str()),
            ("contactNumber", self.contact_number.as_str()),
            ("address", self.address.as_str()),
            ("chiefComplaint", self.chief_complaint.as_str()),
            ("emergencyContactName", self.emergency_contact_name.as_str()),
            ("emergencyContactRelationship", self.emergency_contact_relationship.as_str()),
            ("emergencyContactPhone", self.emergency_contact_phone.as_str()),
        ]
    }

    /// Wire names of required fields that are still blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.required()
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name)
            .collect()
    }

    pub fn into_new_patient(self, consent_given: bool) -> Result<NewPatient, ApiError> {
        if !consent_given {
            return Err(ApiError::Validation(
                "Please provide consent to proceed".to_string(),
            ));
        }
        let age = parse_age(&self.age)?;
        let patient = NewPatient {
            full_name: self.full_name,
            age,
            gender: normalize_gender(&self.gender),
            contact_number: self.contact_number,
            email: Some(self.email),
            address: self.address,
            chief_complaint: self.chief_complaint,
            medical_history: Some(self.medical_history),
            allergies: Some(self.allergies),
            current_medications: Some(self.current_medications),
            emergency_contact: EmergencyContact {
                name: self.emergency_contact_name,
                relationship: self.emergency_contact_relationship,
                phone: self.emergency_contact_phone,
            },
            consent_given,
        }
        .normalized();
        patient.validate()?;
        Ok(patient)
    }
}

// Extracted drafts sometimes carry numbers or nulls where text is expected.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Leading-integer parse: "21", "+21", " 21 years" and "21.5" all yield 21.
fn parse_age(raw: &str) -> Result<i32, ApiError> {
    let trimmed = raw.trim();
    let digits: String = trimmed
        .strip_prefix('+')
        .unwrap_or(trimmed)
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits
        .parse()
        .map_err(|_| ApiError::Validation(format!("age must be a number, got {raw:?}")))
}

fn normalize_gender(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "male" | "m" => "Male".to_string(),
        "female" | "f" => "Female".to_string(),
        "other" => "Other".to_string(),
        _ => trimmed.to_string(),
    }
}

//! Narrow views of the domain entities the workers touch.
//!
//! The CRUD surface owns the full models; the workers only need the fields
//! that ride on envelopes, feed email templates, or fill search projections.
//! Anything serializable here serializes in camelCase to stay compatible
//! with the running producers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user, as the email and indexing workers see one.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
    /// None until the user completes address verification. Every email
    /// template except address verification itself is gated on this.
    pub email_address_verified_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn email_verified(&self) -> bool {
        self.email_address_verified_at.is_some()
    }
}

/// A household with its member users resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Household {
    pub id: String,
    pub name: String,
    /// Hex-encoded HMAC key used to sign webhook deliveries.
    pub webhook_encryption_key: String,
    pub members: Vec<HouseholdMember>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HouseholdMember {
    pub belongs_to_user: User,
}

/// A webhook registration. Executions POST the envelope to `url` using
/// `method`, marshaled as `content_type` and signed with the household key.
#[derive(Debug, Clone, PartialEq)]
pub struct Webhook {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub url: String,
    pub method: String,
    pub belongs_to_household: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlan {
    pub id: String,
    #[serde(default)]
    pub notes: String,
    #[serde(rename = "belongsToHousehold")]
    pub belongs_to_household: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidIngredient {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidInstrument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidMeasurementUnit {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidPreparation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidIngredientState {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidVessel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Join row: an ingredient measured in a particular unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidIngredientMeasurementUnit {
    pub id: String,
    #[serde(default)]
    pub notes: String,
}

/// Join row: an instrument applicable to a preparation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidPreparationInstrument {
    pub id: String,
    #[serde(default)]
    pub notes: String,
}

/// Join row: a preparation applicable to an ingredient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidIngredientPreparation {
    pub id: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordResetToken {
    pub id: String,
    pub token: String,
    #[serde(rename = "belongsToUser")]
    pub belongs_to_user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseholdInvitation {
    pub id: String,
    pub token: String,
    #[serde(rename = "toEmail")]
    pub to_email: String,
    #[serde(default)]
    pub note: String,
    #[serde(rename = "destinationHousehold")]
    pub destination_household: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meal_plan_wire_names() {
        let raw = r#"{"id": "mp1", "belongsToHousehold": "h1"}"#;
        let plan: MealPlan = serde_json::from_str(raw).unwrap();
        assert_eq!(plan.belongs_to_household, "h1");
        assert_eq!(plan.notes, "");
    }

    #[test]
    fn email_verification_gate() {
        let mut user = User {
            id: "u1".into(),
            username: "cook".into(),
            first_name: "Pat".into(),
            last_name: "Doe".into(),
            email_address: "pat@example.com".into(),
            email_address_verified_at: None,
        };
        assert!(!user.email_verified());

        user.email_address_verified_at = Some(Utc::now());
        assert!(user.email_verified());
    }
}

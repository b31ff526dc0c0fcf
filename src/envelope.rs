//! The event envelope and the closed event-kind enumeration.
//!
//! A [`DataChangeMessage`] is the immutable record of a single domain change,
//! published by the API to the data-changes topic and consumed by the fan-out
//! worker. The kind determines which of the optional typed payload fields is
//! populated; at most one ever is.
//!
//! Wire compatibility matters here: field names and kind strings must match
//! what the running producers emit, so everything serializes in camelCase
//! with the original snake_case kind strings.

use std::collections::HashMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    HouseholdInvitation, Meal, MealPlan, PasswordResetToken, Recipe, ValidIngredient,
    ValidIngredientMeasurementUnit, ValidIngredientPreparation, ValidIngredientState,
    ValidInstrument, ValidMeasurementUnit, ValidPreparation, ValidPreparationInstrument,
    ValidVessel,
};

/// Defines [`ServiceEventType`] together with its wire strings, so the enum,
/// `as_str`, and `from_wire` can never drift apart.
macro_rules! service_event_types {
    ($($variant:ident => $wire:literal),+ $(,)?) => {
        /// Every event kind the service emits. Closed: unknown strings fail
        /// to decode, which the workers treat as a malformed message.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ServiceEventType {
            $($variant,)+
        }

        impl ServiceEventType {
            /// All kinds, in declaration order.
            pub const ALL: &'static [ServiceEventType] = &[$(ServiceEventType::$variant,)+];

            /// The wire string for this kind.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ServiceEventType::$variant => $wire,)+
                }
            }

            /// Parse a wire string back into a kind.
            pub fn from_wire(s: &str) -> Option<Self> {
                match s {
                    $($wire => Some(ServiceEventType::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

service_event_types! {
    UserSignedUp => "user_signed_up",
    UserArchived => "user_archived",
    UserEmailAddressVerified => "user_email_address_verified",
    UserEmailAddressVerificationEmailRequested => "user_email_address_verification_email_requested",
    EmailAddressChanged => "email_address_changed",
    UsernameChanged => "username_changed",
    UserDetailsChanged => "user_details_changed",
    UsernameReminderRequested => "username_reminder_requested",
    PasswordResetTokenCreated => "password_reset_token_created",
    PasswordResetTokenRedeemed => "password_reset_token_redeemed",
    PasswordChanged => "password_changed",
    TwoFactorSecretVerified => "two_factor_secret_verified",
    TwoFactorDeactivated => "two_factor_deactivated",
    TwoFactorSecretChanged => "two_factor_secret_changed",
    UserLoggedIn => "user_logged_in",
    UserLoggedOut => "user_logged_out",
    UserChangedActiveHousehold => "user_changed_active_household",
    HouseholdMemberRemoved => "household_member_removed",
    HouseholdMembershipPermissionsUpdated => "household_membership_permissions_updated",
    HouseholdOwnershipTransferred => "household_ownership_transferred",
    HouseholdInvitationCreated => "household_invitation_created",
    OAuth2ClientCreated => "oauth2_client_created",
    OAuth2ClientArchived => "oauth2_client_archived",
    MealPlanCreated => "meal_plan_created",
    RecipeCreated => "recipe_created",
    RecipeUpdated => "recipe_updated",
    RecipeArchived => "recipe_archived",
    MealCreated => "meal_created",
    MealUpdated => "meal_updated",
    MealArchived => "meal_archived",
    ValidIngredientCreated => "valid_ingredient_created",
    ValidIngredientUpdated => "valid_ingredient_updated",
    ValidIngredientArchived => "valid_ingredient_archived",
    ValidInstrumentCreated => "valid_instrument_created",
    ValidInstrumentUpdated => "valid_instrument_updated",
    ValidInstrumentArchived => "valid_instrument_archived",
    ValidMeasurementUnitCreated => "valid_measurement_unit_created",
    ValidMeasurementUnitUpdated => "valid_measurement_unit_updated",
    ValidMeasurementUnitArchived => "valid_measurement_unit_archived",
    ValidPreparationCreated => "valid_preparation_created",
    ValidPreparationUpdated => "valid_preparation_updated",
    ValidPreparationArchived => "valid_preparation_archived",
    ValidIngredientStateCreated => "valid_ingredient_state_created",
    ValidIngredientStateUpdated => "valid_ingredient_state_updated",
    ValidIngredientStateArchived => "valid_ingredient_state_archived",
    ValidVesselCreated => "valid_vessel_created",
    ValidVesselUpdated => "valid_vessel_updated",
    ValidVesselArchived => "valid_vessel_archived",
    ValidIngredientMeasurementUnitCreated => "valid_ingredient_measurement_unit_created",
    ValidIngredientMeasurementUnitUpdated => "valid_ingredient_measurement_unit_updated",
    ValidIngredientMeasurementUnitArchived => "valid_ingredient_measurement_unit_archived",
    ValidPreparationInstrumentCreated => "valid_preparation_instrument_created",
    ValidPreparationInstrumentUpdated => "valid_preparation_instrument_updated",
    ValidPreparationInstrumentArchived => "valid_preparation_instrument_archived",
    ValidIngredientPreparationCreated => "valid_ingredient_preparation_created",
    ValidIngredientPreparationUpdated => "valid_ingredient_preparation_updated",
    ValidIngredientPreparationArchived => "valid_ingredient_preparation_archived",
}

impl fmt::Display for ServiceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ServiceEventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ServiceEventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ServiceEventType::from_wire(&s)
            .ok_or_else(|| de::Error::custom(format!("unknown service event type {s:?}")))
    }
}

/// The immutable record of a single domain change.
///
/// `event_type` uniquely determines which optional payload field is
/// populated; the dispatchers rely on this. An envelope is never mutated
/// after publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeMessage {
    /// Unique id, assigned at creation.
    pub id: String,

    #[serde(rename = "eventType")]
    pub event_type: ServiceEventType,

    /// Populated for user-originated events.
    #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Populated when the event is scoped to a household.
    #[serde(rename = "householdID", default, skip_serializing_if = "Option::is_none")]
    pub household_id: Option<String>,

    /// Free-form analytics context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, Value>,

    #[serde(rename = "mealPlan", default, skip_serializing_if = "Option::is_none")]
    pub meal_plan: Option<MealPlan>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<Recipe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal: Option<Meal>,

    #[serde(rename = "validIngredient", default, skip_serializing_if = "Option::is_none")]
    pub valid_ingredient: Option<ValidIngredient>,

    #[serde(rename = "validInstrument", default, skip_serializing_if = "Option::is_none")]
    pub valid_instrument: Option<ValidInstrument>,

    #[serde(rename = "validMeasurementUnit", default, skip_serializing_if = "Option::is_none")]
    pub valid_measurement_unit: Option<ValidMeasurementUnit>,

    #[serde(rename = "validPreparation", default, skip_serializing_if = "Option::is_none")]
    pub valid_preparation: Option<ValidPreparation>,

    #[serde(rename = "validIngredientState", default, skip_serializing_if = "Option::is_none")]
    pub valid_ingredient_state: Option<ValidIngredientState>,

    #[serde(rename = "validVessel", default, skip_serializing_if = "Option::is_none")]
    pub valid_vessel: Option<ValidVessel>,

    #[serde(
        rename = "validIngredientMeasurementUnit",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub valid_ingredient_measurement_unit: Option<ValidIngredientMeasurementUnit>,

    #[serde(
        rename = "validPreparationInstrument",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub valid_preparation_instrument: Option<ValidPreparationInstrument>,

    #[serde(
        rename = "validIngredientPreparation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub valid_ingredient_preparation: Option<ValidIngredientPreparation>,

    #[serde(
        rename = "emailVerificationToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub email_verification_token: Option<String>,

    #[serde(rename = "passwordResetToken", default, skip_serializing_if = "Option::is_none")]
    pub password_reset_token: Option<PasswordResetToken>,

    #[serde(rename = "householdInvitation", default, skip_serializing_if = "Option::is_none")]
    pub household_invitation: Option<HouseholdInvitation>,
}

impl DataChangeMessage {
    /// Create an empty envelope for the given kind with a fresh id.
    pub fn new(event_type: ServiceEventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            user_id: None,
            household_id: None,
            context: HashMap::new(),
            meal_plan: None,
            recipe: None,
            meal: None,
            valid_ingredient: None,
            valid_instrument: None,
            valid_measurement_unit: None,
            valid_preparation: None,
            valid_ingredient_state: None,
            valid_vessel: None,
            valid_ingredient_measurement_unit: None,
            valid_preparation_instrument: None,
            valid_ingredient_preparation: None,
            email_verification_token: None,
            password_reset_token: None,
            household_invitation: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_household(mut self, household_id: impl Into<String>) -> Self {
        self.household_id = Some(household_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

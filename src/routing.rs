//! The routing table: which downstream concerns an event kind fans out to.
//!
//! [`route`] is a pure, total function from event kind to a
//! [`RouteDecision`]. It is the single source of truth for fan-out: adding a
//! new event kind means editing this table, not touching three dispatchers.
//!
//! Note on the search column: in the current deployment every indexable
//! family other than users routes to the `recipes` index, including meals and
//! the valid-* enumerations. That mapping is preserved here exactly; whether
//! it is intended shared indexing is an open question for the maintainers.

use crate::email::TemplateType;
use crate::envelope::{DataChangeMessage, ServiceEventType};
use crate::search::IndexType;

use ServiceEventType as E;

/// What a single event kind fans out to.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    /// The email template this kind triggers, if any.
    pub email: Option<TemplateType>,
    /// The search-index action this kind triggers, if any.
    pub search: Option<SearchRoute>,
    /// Whether household webhooks may fire for this kind. Webhook dispatch
    /// additionally requires the envelope to carry a household id.
    pub eligible_for_webhooks: bool,
}

/// A search-index action: which index, which payload family carries the row
/// id, and whether this kind removes the row rather than upserting it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchRoute {
    pub index: IndexType,
    pub family: EntityFamily,
    pub delete: bool,
}

/// The entity family whose typed payload carries the affected row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityFamily {
    User,
    Recipe,
    Meal,
    ValidIngredient,
    ValidInstrument,
    ValidMeasurementUnit,
    ValidPreparation,
    ValidIngredientState,
    ValidIngredientMeasurementUnit,
    ValidPreparationInstrument,
    ValidIngredientPreparation,
}

impl EntityFamily {
    /// Extract the affected row id from the envelope field this family owns.
    /// Returns None when the producer failed to populate the payload.
    pub fn row_id<'a>(&self, msg: &'a DataChangeMessage) -> Option<&'a str> {
        match self {
            EntityFamily::User => msg.user_id.as_deref(),
            EntityFamily::Recipe => msg.recipe.as_ref().map(|r| r.id.as_str()),
            EntityFamily::Meal => msg.meal.as_ref().map(|m| m.id.as_str()),
            EntityFamily::ValidIngredient => {
                msg.valid_ingredient.as_ref().map(|v| v.id.as_str())
            }
            EntityFamily::ValidInstrument => {
                msg.valid_instrument.as_ref().map(|v| v.id.as_str())
            }
            EntityFamily::ValidMeasurementUnit => {
                msg.valid_measurement_unit.as_ref().map(|v| v.id.as_str())
            }
            EntityFamily::ValidPreparation => {
                msg.valid_preparation.as_ref().map(|v| v.id.as_str())
            }
            EntityFamily::ValidIngredientState => {
                msg.valid_ingredient_state.as_ref().map(|v| v.id.as_str())
            }
            EntityFamily::ValidIngredientMeasurementUnit => msg
                .valid_ingredient_measurement_unit
                .as_ref()
                .map(|v| v.id.as_str()),
            EntityFamily::ValidPreparationInstrument => msg
                .valid_preparation_instrument
                .as_ref()
                .map(|v| v.id.as_str()),
            EntityFamily::ValidIngredientPreparation => msg
                .valid_ingredient_preparation
                .as_ref()
                .map(|v| v.id.as_str()),
        }
    }
}

/// User- and auth-lifecycle kinds that never fire household webhooks, even
/// when a household id is present on the envelope.
const WEBHOOK_BLOCKLIST: &[ServiceEventType] = &[
    E::UserSignedUp,
    E::UserArchived,
    E::TwoFactorSecretVerified,
    E::TwoFactorDeactivated,
    E::TwoFactorSecretChanged,
    E::PasswordResetTokenCreated,
    E::PasswordResetTokenRedeemed,
    E::PasswordChanged,
    E::EmailAddressChanged,
    E::UsernameChanged,
    E::UserDetailsChanged,
    E::UsernameReminderRequested,
    E::UserLoggedIn,
    E::UserLoggedOut,
    E::UserChangedActiveHousehold,
    E::UserEmailAddressVerified,
    E::UserEmailAddressVerificationEmailRequested,
    E::HouseholdMemberRemoved,
    E::HouseholdMembershipPermissionsUpdated,
    E::HouseholdOwnershipTransferred,
    E::OAuth2ClientCreated,
    E::OAuth2ClientArchived,
];

fn email_for(kind: ServiceEventType) -> Option<TemplateType> {
    match kind {
        E::UserSignedUp | E::UserEmailAddressVerificationEmailRequested => {
            Some(TemplateType::VerifyEmail)
        }
        E::MealPlanCreated => Some(TemplateType::MealPlanCreated),
        E::PasswordResetTokenCreated => Some(TemplateType::PasswordResetTokenCreated),
        E::PasswordResetTokenRedeemed => Some(TemplateType::PasswordResetTokenRedeemed),
        E::PasswordChanged => Some(TemplateType::PasswordChanged),
        E::UsernameReminderRequested => Some(TemplateType::UsernameReminder),
        E::HouseholdInvitationCreated => Some(TemplateType::Invite),
        _ => None,
    }
}

fn search_for(kind: ServiceEventType) -> Option<SearchRoute> {
    let entry = |index, family, delete| Some(SearchRoute { index, family, delete });

    match kind {
        E::UserSignedUp
        | E::UserArchived
        | E::EmailAddressChanged
        | E::UsernameChanged
        | E::UserDetailsChanged
        | E::UserEmailAddressVerified => entry(
            IndexType::Users,
            EntityFamily::User,
            kind == E::UserArchived,
        ),
        E::RecipeCreated | E::RecipeUpdated | E::RecipeArchived => entry(
            IndexType::Recipes,
            EntityFamily::Recipe,
            kind == E::RecipeArchived,
        ),
        E::MealCreated | E::MealUpdated | E::MealArchived => entry(
            IndexType::Recipes,
            EntityFamily::Meal,
            kind == E::MealArchived,
        ),
        E::ValidIngredientCreated | E::ValidIngredientUpdated | E::ValidIngredientArchived => {
            entry(
                IndexType::Recipes,
                EntityFamily::ValidIngredient,
                kind == E::ValidIngredientArchived,
            )
        }
        E::ValidInstrumentCreated | E::ValidInstrumentUpdated | E::ValidInstrumentArchived => {
            entry(
                IndexType::Recipes,
                EntityFamily::ValidInstrument,
                kind == E::ValidInstrumentArchived,
            )
        }
        E::ValidMeasurementUnitCreated
        | E::ValidMeasurementUnitUpdated
        | E::ValidMeasurementUnitArchived => entry(
            IndexType::Recipes,
            EntityFamily::ValidMeasurementUnit,
            kind == E::ValidMeasurementUnitArchived,
        ),
        E::ValidPreparationCreated | E::ValidPreparationUpdated | E::ValidPreparationArchived => {
            entry(
                IndexType::Recipes,
                EntityFamily::ValidPreparation,
                kind == E::ValidPreparationArchived,
            )
        }
        E::ValidIngredientStateCreated
        | E::ValidIngredientStateUpdated
        | E::ValidIngredientStateArchived => entry(
            IndexType::Recipes,
            EntityFamily::ValidIngredientState,
            kind == E::ValidIngredientStateArchived,
        ),
        E::ValidIngredientMeasurementUnitCreated
        | E::ValidIngredientMeasurementUnitUpdated
        | E::ValidIngredientMeasurementUnitArchived => entry(
            IndexType::Recipes,
            EntityFamily::ValidIngredientMeasurementUnit,
            kind == E::ValidIngredientMeasurementUnitArchived,
        ),
        E::ValidPreparationInstrumentCreated
        | E::ValidPreparationInstrumentUpdated
        | E::ValidPreparationInstrumentArchived => entry(
            IndexType::Recipes,
            EntityFamily::ValidPreparationInstrument,
            kind == E::ValidPreparationInstrumentArchived,
        ),
        E::ValidIngredientPreparationCreated
        | E::ValidIngredientPreparationUpdated
        | E::ValidIngredientPreparationArchived => entry(
            IndexType::Recipes,
            EntityFamily::ValidIngredientPreparation,
            kind == E::ValidIngredientPreparationArchived,
        ),
        _ => None,
    }
}

/// The fan-out decision for an event kind. Depends only on the kind, never
/// on payload contents.
pub fn route(kind: ServiceEventType) -> RouteDecision {
    RouteDecision {
        email: email_for(kind),
        search: search_for(kind),
        eligible_for_webhooks: !WEBHOOK_BLOCKLIST.contains(&kind),
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use auth_services::IdentityRecord;
use postgres::StoreError;

use crate::prober::ProbeError;

/// A durable request to be told when a restaurant starts delivering.
///
/// Unique per `(restaurant_id, email)`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Unique identifier for the subscription
    pub id: Uuid,
    /// Subscriber e-mail
    pub email: String,
    /// Directory id of the restaurant
    pub restaurant_id: String,
    /// Display name of the restaurant
    pub restaurant_name: String,
    /// Latitude the restaurant was searched from
    pub lat: f64,
    /// Longitude the restaurant was searched from
    pub lon: f64,
    /// Image snapshot taken at subscribe time
    pub restaurant_image: Option<String>,
    /// Address snapshot taken at subscribe time
    pub restaurant_address: Option<String>,
    /// When the subscription was created
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// What the prober needs to re-check this subscription.
    pub fn probe_target(&self) -> SubscriptionTarget {
        SubscriptionTarget {
            restaurant_id: self.restaurant_id.clone(),
            restaurant_name: self.restaurant_name.clone(),
            location: Coordinates {
                lat: self.lat,
                lon: self.lon,
            },
        }
    }
}

/// Location as sent by the client; every coordinate is required.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LocationInput {
    /// Latitude
    #[validate(required)]
    pub lat: Option<f64>,
    /// Longitude
    #[validate(required)]
    pub lon: Option<f64>,
}

/// Body of the subscribe and unsubscribe requests.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantRequest {
    /// Directory id of the restaurant
    #[validate(required, length(min = 1))]
    pub restaurant_id: Option<String>,
    /// Display name of the restaurant
    #[validate(required, length(min = 1))]
    pub restaurant_name: Option<String>,
    /// Where the restaurant was searched from
    #[validate(required, nested)]
    pub location: Option<LocationInput>,
}

/// A pair of coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude
    pub lat: f64,
    /// Longitude
    pub lon: f64,
}

/// A validated restaurant reference.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionTarget {
    /// Directory id of the restaurant
    pub restaurant_id: String,
    /// Display name of the restaurant
    pub restaurant_name: String,
    /// Where the restaurant was searched from
    pub location: Coordinates,
}

impl RestaurantRequest {
    /// Checks every required attribute, naming all of the missing ones at once.
    pub fn into_target(self) -> Result<SubscriptionTarget, WatchError> {
        if let Err(errors) = self.validate() {
            return Err(WatchError::MissingAttribute(missing_fields(&errors)));
        }

        let missing = |field: &str| WatchError::MissingAttribute(vec![field.to_string()]);
        let location = self.location.ok_or_else(|| missing("location"))?;

        Ok(SubscriptionTarget {
            restaurant_id: self.restaurant_id.ok_or_else(|| missing("restaurantId"))?,
            restaurant_name: self.restaurant_name.ok_or_else(|| missing("restaurantName"))?,
            location: Coordinates {
                lat: location.lat.ok_or_else(|| missing("location.lat"))?,
                lon: location.lon.ok_or_else(|| missing("location.lon"))?,
            },
        })
    }
}

/// Dotted paths of every field that failed validation, sorted.
///
/// Paths use the request's JSON keys, so `restaurant_id` reads `restaurantId`.
pub fn missing_fields(errors: &ValidationErrors) -> Vec<String> {
    let mut fields = Vec::new();
    collect_field_paths(errors, "", &mut fields);
    fields.sort();
    fields
}

fn collect_field_paths(errors: &ValidationErrors, prefix: &str, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let key = json_key(field);
        let path = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };
        match kind {
            ValidationErrorsKind::Field(_) => out.push(path),
            ValidationErrorsKind::Struct(inner) => collect_field_paths(inner, &path, out),
            ValidationErrorsKind::List(items) => {
                for inner in items.values() {
                    collect_field_paths(inner, &path, out);
                }
            }
        }
    }
}

fn json_key(field: &str) -> String {
    let mut key = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            key.extend(c.to_uppercase());
            upper = false;
        } else {
            key.push(c);
        }
    }
    key
}

/// Public part of a subscriber's identity, shown to the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberProfile {
    /// Subscriber e-mail
    pub email: String,
    /// Given name
    pub first_name: Option<String>,
    /// Family name
    pub family_name: Option<String>,
    /// Avatar URL
    pub image_url: Option<String>,
}

impl From<&IdentityRecord> for SubscriberProfile {
    fn from(record: &IdentityRecord) -> Self {
        Self {
            email: record.email.clone(),
            first_name: record.first_name.clone(),
            family_name: record.family_name.clone(),
            image_url: record.image_url.clone(),
        }
    }
}

/// A subscription as returned to a caller.
///
/// The operator annotations are only present in the operator's view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    /// The subscription itself
    #[serde(flatten)]
    pub subscription: Subscription,
    /// Profile of the subscriber (operator view only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber: Option<SubscriberProfile>,
    /// Whether the subscription belongs to the operator (operator view only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
}

impl From<Subscription> for SubscriptionView {
    fn from(subscription: Subscription) -> Self {
        Self {
            subscription,
            subscriber: None,
            is_admin: None,
        }
    }
}

/// The subscriptions visible to one caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionListing {
    /// Visible subscriptions, newest first
    pub subscriptions: Vec<SubscriptionView>,
    /// Set to `true` when this is the operator's view of every subscription
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
}

/// Custom error type for subscription operations
#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    /// Required attributes are missing from the request
    #[error("missing attribute: {}", .0.join(", "))]
    MissingAttribute(Vec<String>),

    /// The directory does not know the restaurant
    #[error("can not find this restaurant")]
    EntityNotFound,

    /// The restaurant already delivers, so there is nothing to wait for
    #[error("restaurant already open")]
    AlreadyOpen,

    /// The directory could not be asked
    #[error("Directory error: {0}")]
    Probe(ProbeError),

    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl actix_web::ResponseError for WatchError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            WatchError::MissingAttribute(_)
            | WatchError::EntityNotFound
            | WatchError::AlreadyOpen => StatusCode::BAD_REQUEST,
            WatchError::Probe(_) => StatusCode::BAD_GATEWAY,
            WatchError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        use actix_web::HttpResponse;

        match self {
            WatchError::MissingAttribute(fields) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "missing_attribute",
                    "message": "missing attribute",
                    "fields": fields
                }))
            }
            WatchError::EntityNotFound => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "restaurant_not_found",
                "message": "can not find this restaurant"
            })),
            WatchError::AlreadyOpen => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "already_open",
                "message": "restaurant already open"
            })),
            WatchError::Probe(_) => HttpResponse::BadGateway().json(serde_json::json!({
                "error": "directory_error",
                "message": "restaurant directory is unavailable"
            })),
            WatchError::Store(_) => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "internal_error",
                "message": "something went wrong"
            })),
        }
    }
}

use actix_web::{HttpResponse, Result, web};
use serde::Serialize;

use auth_services::IdentityRecord;
use auth_services::middleware::AuthenticatedUser;
use subscription_watch::{RestaurantRequest, SubscriptionListing, SubscriptionService, WatchError};

/// Body returned by every subscription endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionsResponse {
    /// Visible subscriptions, plus `isAdmin` for the operator
    #[serde(flatten)]
    pub listing: SubscriptionListing,
    /// The identity the request was resolved to
    pub user_context: IdentityRecord,
}

/// Subscribes the authenticated user to a restaurant that is currently closed
pub async fn subscribe(
    service: web::Data<SubscriptionService>,
    user: AuthenticatedUser,
    request: web::Json<RestaurantRequest>,
) -> Result<HttpResponse, WatchError> {
    let listing = service.subscribe(&user.0, request.into_inner()).await?;

    Ok(HttpResponse::Ok().json(SubscriptionsResponse {
        listing,
        user_context: user.0,
    }))
}

/// Removes the authenticated user's subscription to a restaurant
pub async fn unsubscribe(
    service: web::Data<SubscriptionService>,
    user: AuthenticatedUser,
    request: web::Json<RestaurantRequest>,
) -> Result<HttpResponse, WatchError> {
    let listing = service.unsubscribe(&user.0, request.into_inner()).await?;

    Ok(HttpResponse::Ok().json(SubscriptionsResponse {
        listing,
        user_context: user.0,
    }))
}

/// Gets the subscriptions visible to the authenticated user
pub async fn get_subscriptions(
    service: web::Data<SubscriptionService>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, WatchError> {
    let listing = service.list_subscriptions(&user.0).await?;

    Ok(HttpResponse::Ok().json(SubscriptionsResponse {
        listing,
        user_context: user.0,
    }))
}

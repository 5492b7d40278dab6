use actix_web::{HttpResponse, Result, web};

use auth_services::middleware::AuthenticatedUser;
use subscription_watch::WatchStats;

/// Health check endpoint for the API
pub async fn api_health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "service": "delivery-watch",
        "status": "healthy",
        "timestamp": chrono::Utc::now()
    })))
}

/// Counters of the background watcher and pruner. Operator only.
pub async fn watch_stats(
    stats: web::Data<WatchStats>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    if !user.0.is_operator() {
        log::warn!("{} asked for watch stats without operator role", user.0.email);
        return Ok(HttpResponse::Forbidden().json(serde_json::json!({
            "error": "forbidden",
            "message": "operator only"
        })));
    }

    Ok(HttpResponse::Ok().json(stats.snapshot()))
}

#[cfg(test)]
mod tests {
    use actix_web::dev::Service;
    use actix_web::{App, HttpMessage, test};
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    use auth_services::{IdentityRecord, Provider, Role};

    use super::*;

    fn identity(email: &str, role: Role) -> IdentityRecord {
        IdentityRecord {
            provider: Provider::Facebook,
            email: email.to_string(),
            first_name: None,
            family_name: None,
            image_url: None,
            token: "tok".into(),
            token_expiration: Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap(),
            role,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    async fn stats_as(role: Role) -> actix_web::dev::ServiceResponse {
        let caller = identity("someone@example.com", role);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(WatchStats::new()))
                // stands in for the user context middleware
                .wrap_fn(move |req, srv| {
                    req.extensions_mut().insert(caller.clone());
                    srv.call(req)
                })
                .route("/api/watch/stats", web::get().to(watch_stats)),
        )
        .await;
        let req = test::TestRequest::get().uri("/api/watch/stats").to_request();
        test::call_service(&app, req).await
    }

    #[actix_web::test]
    async fn stats_are_operator_only() {
        let resp = stats_as(Role::User).await;
        assert_eq!(resp.status(), 403);
    }

    #[actix_web::test]
    async fn operator_reads_counters() {
        let resp = stats_as(Role::Operator).await;
        assert_eq!(resp.status(), 200);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["ticks"], 0);
        assert_eq!(body["probeFailures"], 0);
        assert!(body["lastTick"].is_null());
    }

    #[actix_web::test]
    async fn health_reports_status() {
        let app = test::init_service(App::new().route("/api/health", web::get().to(api_health))).await;

        let body: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/health").to_request(),
        )
        .await;

        assert_eq!(body["status"], "healthy");
    }
}

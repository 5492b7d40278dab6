use actix_web::{
    Error, HttpMessage, Result,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::{
        Method,
        header::{HeaderName, HeaderValue},
    },
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{Ready, ready},
    rc::Rc,
    sync::Arc,
};

use crate::service::SessionCache;
use crate::types::IdentityRecord;

/// Header naming the identity provider.
pub const PROVIDER_HEADER: &str = "provider";
/// Header carrying the provider access token.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";
/// Response header echoing the resolved identity.
pub const USER_CONTEXT_HEADER: &str = "x-user-context";

/// URL-encoded JSON of `record`, falling back to `{email, token}` if it cannot be serialized.
pub fn user_context_header(record: &IdentityRecord) -> String {
    let json = serde_json::to_string(record).unwrap_or_else(|_| {
        serde_json::json!({ "email": record.email, "token": record.token }).to_string()
    });
    urlencoding::encode(&json).into_owned()
}

/// Middleware that resolves the caller's session from the `provider` and `x-auth-token`
/// headers and stores the identity in the request extensions.
pub struct UserContextMiddleware {
    sessions: Arc<SessionCache>,
}

impl UserContextMiddleware {
    /// Creates the middleware over a shared session cache.
    pub fn new(sessions: Arc<SessionCache>) -> Self {
        Self { sessions }
    }
}

impl<S, B> Transform<S, ServiceRequest> for UserContextMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = UserContextMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(UserContextMiddlewareService {
            service: Rc::new(service),
            sessions: self.sessions.clone(),
        }))
    }
}

/// Service that implements the user context middleware logic
pub struct UserContextMiddlewareService<S> {
    service: Rc<S>,
    sessions: Arc<SessionCache>,
}

fn header_str<'a>(req: &'a ServiceRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|h| h.to_str().ok())
}

impl<S, B> Service<ServiceRequest> for UserContextMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let sessions = self.sessions.clone();

        Box::pin(async move {
            if req.method() == Method::OPTIONS {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            let provider = header_str(&req, PROVIDER_HEADER).map(str::to_owned);
            let token = header_str(&req, AUTH_TOKEN_HEADER).map(str::to_owned);

            let record = match sessions
                .resolve_session(provider.as_deref(), token.as_deref())
                .await
            {
                Ok(record) => record,
                Err(e) => {
                    log::error!("[UserContext] error: {:?}", e);
                    let response = actix_web::ResponseError::error_response(&e);
                    return Ok(req.into_response(response).map_into_right_body());
                }
            };

            let header = user_context_header(&record);
            req.extensions_mut().insert(record);

            let mut res = service.call(req).await?;
            match HeaderValue::from_str(&header) {
                Ok(value) => {
                    res.headers_mut()
                        .insert(HeaderName::from_static(USER_CONTEXT_HEADER), value);
                }
                Err(e) => log::warn!("[UserContext] could not set user context header: {}", e),
            }
            Ok(res.map_into_left_body())
        })
    }
}

/// Custom extractor for the authenticated identity
pub struct AuthenticatedUser(pub IdentityRecord);

impl actix_web::FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &actix_web::HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        let record = req.extensions().get::<IdentityRecord>().cloned();

        ready(match record {
            Some(record) => Ok(AuthenticatedUser(record)),
            None => Err(actix_web::error::ErrorUnauthorized("failed to login")),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::types::{Provider, Role};

    fn record() -> IdentityRecord {
        IdentityRecord {
            provider: Provider::Google,
            email: "dana@example.com".into(),
            first_name: Some("Dana".into()),
            family_name: None,
            image_url: None,
            token: "tok 1".into(),
            token_expiration: Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap(),
            role: Role::User,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn user_context_header_is_url_encoded_json() {
        let header = user_context_header(&record());

        assert!(!header.contains('{'));
        assert!(!header.contains(' '));
        let decoded = urlencoding::decode(&header).unwrap();
        let json: serde_json::Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(json["email"], "dana@example.com");
        assert_eq!(json["token"], "tok 1");
        assert_eq!(json["role"], "user");
        assert!(HeaderValue::from_str(&header).is_ok());
    }
}

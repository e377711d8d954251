use actix_web::http::header::Header;
use actix_web::{web, FromRequest, HttpRequest};
use actix_web_httpauth::headers::authorization::{Authorization, Bearer};
use futures::future::{ready, Ready};

use super::jwt::JwtService;
use super::models::Claims;
use crate::error::PipelineError;

/// Claims of a caller whose bearer token verified.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Claims);

/// Returns the bearer credential carried by the request, if any.
pub fn bearer_credential(req: &HttpRequest) -> Option<String> {
    match Authorization::<Bearer>::parse(req) {
        Ok(auth) => Some(auth.into_scheme().token().to_string()),
        Err(e) => {
            log::debug!("No usable bearer credential for {}: {}", req.path(), e);
            None
        }
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthenticatedUser, PipelineError> {
    let jwt_service = req.app_data::<web::Data<JwtService>>().ok_or_else(|| {
        log::error!("JwtService is not registered as app data");
        PipelineError::Internal("authenticator not configured".to_string())
    })?;

    let token = bearer_credential(req).ok_or(PipelineError::Unauthenticated)?;
    let claims = jwt_service.verify_token(&token).map_err(|e| {
        log::warn!("JWT token verification failed for path {}: {}", req.path(), e);
        PipelineError::from(e)
    })?;

    Ok(AuthenticatedUser(claims))
}

impl FromRequest for AuthenticatedUser {
    type Error = PipelineError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

use actix_web::{web, Either, HttpResponse};
use log::{error, info, warn};
use shared::{LoginRequest, TokenResponse};

use crate::error::PipelineError;

use super::identity::{IdentityError, IdentityProvider};
use super::jwt::JwtService;

pub async fn login(
    form: Either<web::Form<LoginRequest>, web::Json<LoginRequest>>,
    identity: web::Data<dyn IdentityProvider>,
    jwt_service: web::Data<JwtService>,
) -> Result<HttpResponse, PipelineError> {
    let form = match form {
        Either::Left(form) => form.into_inner(),
        Either::Right(json) => json.into_inner(),
    };

    let verified = match identity.authenticate(&form.username, &form.password).await {
        Ok(verified) => verified,
        Err(IdentityError::InvalidCredentials) => {
            warn!("Rejected login for {}", form.username);
            return Err(PipelineError::LoginFailed);
        }
        Err(e) => {
            // Provider outages look the same as bad credentials to the caller.
            error!("Identity provider failed for {}: {}", form.username, e);
            return Err(PipelineError::LoginFailed);
        }
    };

    let access_token = jwt_service
        .generate_token(&verified.subject, verified.role)
        .map_err(|e| {
            error!("Failed to generate JWT token: {:?}", e);
            PipelineError::Internal("token signing failed".to_string())
        })?;

    info!(
        "User {} logged in with role {:?}",
        verified.subject, verified.role
    );

    Ok(HttpResponse::Ok().json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

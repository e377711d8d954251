use futures::future::BoxFuture;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

use super::models::{Role, VerifiedIdentity};

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("URL parsing failed: {0}")]
    UrlError(#[from] url::ParseError),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Identity provider error: {0}")]
    Provider(String),
}

/// Checks a username/password pair and reports who the caller is.
pub trait IdentityProvider: Send + Sync {
    fn authenticate<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<VerifiedIdentity, IdentityError>>;
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SupabaseSession {
    access_token: String,
    user: SupabaseUser,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    role: Option<String>,
}

/// Supabase GoTrue password sign-in, with the role read from the `profiles` table.
#[derive(Clone)]
pub struct SupabaseIdentityProvider {
    http_client: HttpClient,
    base_url: Url,
    api_key: String,
}

impl SupabaseIdentityProvider {
    pub fn new(http_client: HttpClient, base_url: &str, api_key: String) -> Result<Self, IdentityError> {
        Ok(Self {
            http_client,
            base_url: Url::parse(base_url)?,
            api_key,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<SupabaseSession, IdentityError> {
        let mut token_url = self.base_url.join("auth/v1/token")?;
        token_url.query_pairs_mut().append_pair("grant_type", "password");

        let response = self
            .http_client
            .post(token_url)
            .header("apikey", &self.api_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        if response.status().is_client_error() {
            return Err(IdentityError::InvalidCredentials);
        }
        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(IdentityError::Provider(format!(
                "Sign-in failed: {}",
                error_text
            )));
        }

        Ok(response.json().await?)
    }

    async fn fetch_role(&self, session: &SupabaseSession) -> Result<Role, IdentityError> {
        let profile_url = self.base_url.join(&format!(
            "rest/v1/profiles?id=eq.{}&select=role",
            urlencoding::encode(&session.user.id)
        ))?;

        let response = self
            .http_client
            .get(profile_url)
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(IdentityError::Provider(format!(
                "Profile lookup failed: {}",
                error_text
            )));
        }

        let rows: Vec<ProfileRow> = response.json().await?;
        Ok(role_from_profiles(&rows, &session.user.id))
    }
}

fn role_from_profiles(rows: &[ProfileRow], user_id: &str) -> Role {
    let Some(row) = rows.first() else {
        log::warn!("No profile row for user {}; treating as a regular user", user_id);
        return Role::User;
    };
    match row.role.as_deref() {
        Some("admin") => Role::Admin,
        _ => Role::User,
    }
}

impl IdentityProvider for SupabaseIdentityProvider {
    fn authenticate<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<VerifiedIdentity, IdentityError>> {
        Box::pin(async move {
            let session = self.sign_in(username, password).await?;
            let role = self.fetch_role(&session).await?;
            log::debug!("Identity provider confirmed {} with role {:?}", username, role);
            Ok(VerifiedIdentity {
                subject: username.to_string(),
                role,
            })
        })
    }
}

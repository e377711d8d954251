use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The two inference backends the service can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    ChartInstruct,
    UniChart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceKind {
    Upload,
    Url,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ImageUrlRequest {
    pub image_url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InferenceResponse {
    pub description: String,
    pub used_model: BackendKind,
    pub source: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_url: Option<String>,
}

/// Login payload, sent as a form by OAuth2 password-flow clients or as JSON.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// A quota figure: either a count or one of the unbounded markers given to admins.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum QuotaValue {
    Count(u32),
    Marker(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct QuotaResponse {
    pub used: QuotaValue,
    pub limit: QuotaValue,
}

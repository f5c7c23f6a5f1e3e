//! Token based authentication: HS256 JWTs carried in a cookie or a bearer
//! header, plus the handlers behind `/auth/login`, `/auth/logout` and
//! `/auth/refresh`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::binder::NoBody;
use crate::context::Context;
use crate::error::Error;
use crate::transform::{InTransform, OutTransform};

pub const TOKEN_COOKIE: &str = "jwt_token";
pub const TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Claims of a verified token, stored in request extensions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(pub Map<String, Value>);

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }
}

/// Checks a user/password pair and returns the claims to put in the token.
pub type VerifyUser = Arc<dyn Fn(&str, &str) -> Result<Claims, Error> + Send + Sync>;

/// Signs and verifies tokens with a shared HS256 secret.
#[derive(Clone)]
pub struct Security {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Security").field("ttl", &self.ttl).finish()
    }
}

impl Security {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: TOKEN_TTL,
        }
    }

    /// A key that only lives as long as the process.
    pub fn random() -> Self {
        let secret = format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple());
        Self::new(secret.as_bytes())
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, Error> {
        let now = jsonwebtoken::get_current_timestamp();
        let mut payload = claims.0.clone();
        payload.insert("iat".into(), now.into());
        payload.insert("exp".into(), (now + self.ttl.as_secs()).into());
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &payload, &self.encoding).map_err(Error::other)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        jsonwebtoken::decode::<Map<String, Value>>(token, &self.decoding, &validation)
            .map(|data| Claims(data.claims))
            .map_err(|e| Error::unauthorized(format!("invalid token: {e}")))
    }
}

/// Token from the `jwt_token` cookie, falling back to `Authorization: Bearer`.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string());
    if from_cookie.is_some() {
        return from_cookie;
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Middleware attaching [`Claims`] to requests that carry a valid token.
/// Requests without one go through unauthenticated.
pub(crate) async fn attach_claims(State(security): State<Arc<Security>>, mut req: Request, next: Next) -> Response {
    if let Some(token) = token_from_headers(req.headers()) {
        match security.verify(&token) {
            Ok(claims) => {
                req.extensions_mut().insert(claims);
            }
            Err(err) => tracing::debug!(error = %err, "ignoring request token"),
        }
    }
    next.run(req).await
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginPayload {
    pub user: String,
    pub password: String,
}

impl InTransform for LoginPayload {}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
}

impl OutTransform for TokenResponse {}

fn token_cookie(token: &str, max_age: Duration) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(&format!(
        "{TOKEN_COOKIE}={token}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        max_age.as_secs()
    ))
    .map_err(Error::other)
}

pub(crate) async fn login(
    security: Arc<Security>,
    verify: VerifyUser,
    mut ctx: Context<LoginPayload>,
) -> Result<TokenResponse, Error> {
    let payload = ctx.body().await?;
    let user = payload.user.clone();
    let claims = verify(&payload.user, &payload.password)?;
    let token = security.issue(&claims)?;
    ctx.set_header(header::SET_COOKIE, token_cookie(&token, security.ttl())?);
    tracing::debug!(%user, "issued token");
    Ok(TokenResponse { token })
}

pub(crate) async fn refresh(security: Arc<Security>, ctx: Context<NoBody>) -> Result<TokenResponse, Error> {
    let claims = ctx
        .claims()
        .ok_or_else(|| Error::unauthorized("missing or invalid token"))?;
    let token = security.issue(claims)?;
    ctx.set_header(header::SET_COOKIE, token_cookie(&token, security.ttl())?);
    Ok(TokenResponse { token })
}

pub(crate) async fn logout() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, format!("{TOKEN_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax"))],
    )
}

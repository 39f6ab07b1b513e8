//! Token lifecycle for authenticated catalogs: acquisition, expiry checks,
//! and serialized refresh.

use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use reqwest::header;
use std::sync::LazyLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{HTTP_CLIENT, ResolveError, ResolveResult, totp};

/// Safety margin subtracted from the reported lifetime so a token is never
/// used right at its expiry edge.
const EXPIRY_BUFFER_SECS: i64 = 30;

/// A short-lived access credential with an absolute expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Expired at and beyond the expiry instant (the boundary counts as
    /// expired).
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// How a catalog obtains a fresh token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> ResolveResult<AccessToken>;
}

/// Caches one token per extractor and serializes refresh: concurrent callers
/// observing an expired token await the single in-flight fetch instead of
/// firing duplicates.
pub struct TokenManager {
    source: Box<dyn TokenSource>,
    current: Mutex<Option<AccessToken>>,
}

impl TokenManager {
    pub fn new(source: Box<dyn TokenSource>) -> Self {
        Self {
            source,
            current: Mutex::new(None),
        }
    }

    /// Returns a valid token value, refreshing synchronously if the cached
    /// one is missing or expired. The lock is held across the fetch so only
    /// one refresh is ever in flight per extractor.
    pub async fn access_token(&self) -> ResolveResult<String> {
        let mut current = self.current.lock().await;

        if let Some(token) = &*current {
            if !token.is_expired() {
                return Ok(token.value.clone());
            }
            debug!("Cached token expired, refreshing");
        }

        let token = self.source.fetch().await?;
        let value = token.value.clone();
        *current = Some(token);
        Ok(value)
    }

    /// Discards the cached token and fetches a new one. Used exactly once
    /// when a request comes back 401 with a token that still looked valid.
    pub async fn force_refresh(&self) -> ResolveResult<String> {
        info!("Forcing token refresh");
        let mut current = self.current.lock().await;
        let token = self.source.fetch().await?;
        let value = token.value.clone();
        *current = Some(token);
        Ok(value)
    }
}

/// OAuth2 client-credentials flow, used when application credentials are
/// configured.
pub struct ClientCredentialsSource {
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientCredentialsSource {
    pub fn new(token_url: impl Into<String>, client_id: String, client_secret: String) -> Self {
        Self {
            token_url: token_url.into(),
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsSource {
    async fn fetch(&self) -> ResolveResult<AccessToken> {
        let auth = BASE64_STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));

        let params = [("grant_type", "client_credentials")];
        let response = HTTP_CLIENT
            .post(&self.token_url)
            .header(header::AUTHORIZATION, format!("Basic {}", auth))
            .form(&params)
            .send()
            .await
            .map_err(|e| ResolveError::Token(format!("token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Cannot read response".to_string());
            return Err(ResolveError::Token(format!(
                "token endpoint returned {} - {}",
                status, text
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ResolveError::Token(format!("failed to parse token response: {}", e)))?;

        let value = body["access_token"]
            .as_str()
            .ok_or_else(|| ResolveError::Token("missing access_token".to_string()))?
            .to_string();
        let token_type = body["token_type"].as_str().unwrap_or("Bearer").to_string();
        let expires_in = body["expires_in"].as_i64().unwrap_or(0);

        Ok(AccessToken {
            value,
            token_type,
            expires_at: Utc::now()
                + Duration::seconds((expires_in - EXPIRY_BUFFER_SECS).max(0)),
        })
    }
}

static BUNDLE_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"src="([^"]*web-player[^"]*\.js)""#).unwrap());

static BUILD_VER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"buildVer["']?\s*[:=]\s*["']([^"']+)["']"#).unwrap());

static BUILD_DATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"buildDate["']?\s*[:=]\s*["']([^"']+)["']"#).unwrap());

/// Anonymous token derivation for catalogs without configured application
/// credentials: a TOTP-gated public endpoint plus a version fingerprint
/// scraped from the service's current web bundle.
///
/// This whole flow is best-effort; any fetch or parse failure surfaces as a
/// single "failed to retrieve access token" error and the extractor is
/// treated as unavailable for that request.
pub struct AnonymousTokenSource {
    base_url: String,
}

impl AnonymousTokenSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    /// Scrapes buildVer/buildDate out of the current web bundle.
    async fn build_fingerprint(&self) -> ResolveResult<(String, String)> {
        let homepage = fetch_text(&self.base_url).await?;

        let bundle_path = BUNDLE_URL_REGEX
            .captures(&homepage)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ResolveError::Token("web bundle not found on homepage".to_string()))?;

        let bundle_url = if bundle_path.starts_with("http") {
            bundle_path
        } else {
            format!("{}{}", self.base_url, bundle_path)
        };
        let bundle = fetch_text(&bundle_url).await?;

        let build_ver = BUILD_VER_REGEX
            .captures(&bundle)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ResolveError::Token("buildVer not found in bundle".to_string()))?;
        let build_date = BUILD_DATE_REGEX
            .captures(&bundle)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ResolveError::Token("buildDate not found in bundle".to_string()))?;

        Ok((build_ver, build_date))
    }

    async fn server_time(&self) -> ResolveResult<u64> {
        let body: serde_json::Value = HTTP_CLIENT
            .get(format!("{}/server-time", self.base_url))
            .send()
            .await
            .map_err(|e| ResolveError::Token(format!("server time request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| ResolveError::Token(format!("failed to parse server time: {}", e)))?;

        body["serverTime"]
            .as_u64()
            .ok_or_else(|| ResolveError::Token("missing serverTime".to_string()))
    }
}

async fn fetch_text(url: &str) -> ResolveResult<String> {
    let response = HTTP_CLIENT
        .get(url)
        .send()
        .await
        .map_err(|e| ResolveError::Token(format!("request to {} failed: {}", url, e)))?;
    if !response.status().is_success() {
        return Err(ResolveError::Token(format!(
            "{} returned {}",
            url,
            response.status()
        )));
    }
    response
        .text()
        .await
        .map_err(|e| ResolveError::Token(format!("failed to read {}: {}", url, e)))
}

#[async_trait]
impl TokenSource for AnonymousTokenSource {
    async fn fetch(&self) -> ResolveResult<AccessToken> {
        let (build_ver, build_date) = self.build_fingerprint().await?;
        let server_secs = self.server_time().await?;
        let client_secs = Utc::now().timestamp().max(0) as u64;

        let secret = totp::secret_hex();
        let totp_client = totp::generate(&secret, client_secs)
            .ok_or_else(|| ResolveError::Token("totp generation failed".to_string()))?;
        let totp_server = totp::generate(&secret, server_secs)
            .ok_or_else(|| ResolveError::Token("totp generation failed".to_string()))?;

        debug!("Requesting anonymous access token (buildVer {})", build_ver);
        let body: serde_json::Value = HTTP_CLIENT
            .get(format!("{}/get_access_token", self.base_url))
            .query(&[
                ("reason", "init"),
                ("productType", "web-player"),
                ("totp", totp_client.as_str()),
                ("totpServer", totp_server.as_str()),
                ("totpVer", "5"),
                ("buildVer", build_ver.as_str()),
                ("buildDate", build_date.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ResolveError::Token(format!("access token request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| ResolveError::Token(format!("failed to parse access token: {}", e)))?;

        let value = body["accessToken"]
            .as_str()
            .ok_or_else(|| ResolveError::Token("missing accessToken".to_string()))?
            .to_string();
        let expires_ms = body["accessTokenExpirationTimestampMs"]
            .as_i64()
            .ok_or_else(|| ResolveError::Token("missing token expiry".to_string()))?;
        let expires_at = DateTime::from_timestamp_millis(expires_ms)
            .ok_or_else(|| ResolveError::Token("invalid token expiry".to_string()))?;

        Ok(AccessToken {
            value,
            token_type: "Bearer".to_string(),
            expires_at,
        })
    }
}

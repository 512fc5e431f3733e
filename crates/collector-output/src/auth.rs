// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request authentication.
//!
//! The authenticator is resolved once from the configured `auth.type` and
//! applied to every outgoing request right before it is sent. Credential
//! problems are reported when the client is built; signing itself never fails.

use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;
use sha2::{Digest, Sha256};
use tracing::{error, warn};

use crate::config::AuthConfig;
use crate::errors::ConfigError;

type HmacSha256 = Hmac<Sha256>;

pub const BASIC_USERNAME_PROPERTY: &str = "auth_username";
pub const BASIC_PASSWORD_PROPERTY: &str = "auth_password";
pub const HMAC_ACCESS_KEY_PROPERTY: &str = "access_key_id";
pub const HMAC_SECRET_KEY_PROPERTY: &str = "secret_key";

/// Scheme name prefixed to HMAC `Authorization` headers.
pub const HMAC_SCHEME: &str = "HMAC-SHA256";

#[derive(Debug, Clone)]
pub enum Authenticator {
    None,
    Basic(HeaderValue),
    Hmac(HmacSigner),
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Result<Self, ConfigError> {
        let property = |key: &str| config.property.get(key).cloned().unwrap_or_default();
        match config.auth_type.trim().to_lowercase().as_str() {
            "basic" => {
                let username = property(BASIC_USERNAME_PROPERTY);
                if username.is_empty() {
                    return Err(ConfigError::InvalidAuth {
                        auth_type: "basic",
                        reason: format!("{BASIC_USERNAME_PROPERTY} is empty"),
                    });
                }
                let password = property(BASIC_PASSWORD_PROPERTY);
                Ok(Authenticator::Basic(basic_header(&username, &password)?))
            }
            "hmac" => Ok(Authenticator::Hmac(HmacSigner::new(
                &property(HMAC_ACCESS_KEY_PROPERTY),
                &property(HMAC_SECRET_KEY_PROPERTY),
            )?)),
            "" | "none" => Ok(Authenticator::None),
            other => {
                warn!("OUTPUT | Unknown auth type {other}, requests will not be authenticated");
                Ok(Authenticator::None)
            }
        }
    }

    /// Attaches credentials to `request` in place.
    pub fn secure(&self, request: &mut Request) {
        match self {
            Authenticator::None => {}
            Authenticator::Basic(value) => {
                request.headers_mut().insert(AUTHORIZATION, value.clone());
            }
            Authenticator::Hmac(signer) => signer.sign(request),
        }
    }
}

fn basic_header(username: &str, password: &str) -> Result<HeaderValue, ConfigError> {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    let mut value =
        HeaderValue::from_str(&format!("Basic {encoded}")).map_err(|e| ConfigError::InvalidAuth {
            auth_type: "basic",
            reason: e.to_string(),
        })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Signs requests with an access key / secret key pair.
///
/// The signature is a hex HMAC-SHA256 over the canonical request:
///
/// ```text
/// METHOD
/// /path
/// sorted&query=pairs
/// name:value            (one line per header, names lower-cased and sorted)
/// name;name             (signed header names)
/// hex(sha256(body))
/// ```
///
/// The `authorization` header is never signed.
#[derive(Clone)]
pub struct HmacSigner {
    access_key_id: String,
    mac: HmacSha256,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl HmacSigner {
    pub fn new(access_key_id: &str, secret_key: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidAuth {
            auth_type: "hmac",
            reason,
        };
        if access_key_id.is_empty() {
            return Err(invalid(format!("{HMAC_ACCESS_KEY_PROPERTY} is empty")));
        }
        if secret_key.is_empty() {
            return Err(invalid(format!("{HMAC_SECRET_KEY_PROPERTY} is empty")));
        }
        // the access key ends up in a header value
        HeaderValue::from_str(access_key_id).map_err(|e| invalid(e.to_string()))?;
        let mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|e| invalid(e.to_string()))?;
        Ok(HmacSigner {
            access_key_id: access_key_id.to_string(),
            mac,
        })
    }

    /// Returns the canonical request and the `;`-joined signed header names.
    #[must_use]
    pub fn canonical_request(&self, request: &Request) -> (String, String) {
        let mut query: Vec<&str> = request
            .url()
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|pair| !pair.is_empty())
            .collect();
        query.sort_unstable();

        let headers = request.headers();
        let mut names: Vec<&str> = headers
            .keys()
            .map(|name| name.as_str())
            .filter(|name| *name != AUTHORIZATION.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();

        let mut canonical_headers = String::new();
        for name in &names {
            let values: Vec<String> = headers
                .get_all(*name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string())
                .collect();
            canonical_headers.push_str(name);
            canonical_headers.push(':');
            canonical_headers.push_str(&values.join(","));
            canonical_headers.push('\n');
        }
        let signed_headers = names.join(";");

        let body = request
            .body()
            .and_then(reqwest::Body::as_bytes)
            .unwrap_or_default();
        let body_hash = hex::encode(Sha256::digest(body));

        let canonical = format!(
            "{}\n{}\n{}\n{}{}\n{}",
            request.method().as_str(),
            request.url().path(),
            query.join("&"),
            canonical_headers,
            signed_headers,
            body_hash
        );
        (canonical, signed_headers)
    }

    #[must_use]
    pub fn signature(&self, canonical_request: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(canonical_request.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn sign(&self, request: &mut Request) {
        let (canonical, signed_headers) = self.canonical_request(request);
        let signature = self.signature(&canonical);
        let header = format!(
            "{HMAC_SCHEME} Credential={}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key_id
        );
        match HeaderValue::from_str(&header) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(e) => error!("OUTPUT | Failed to attach hmac signature: {e}"),
        }
    }
}

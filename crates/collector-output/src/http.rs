// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request templates and HTTP client construction.

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_ENCODING, CONTENT_TYPE,
};
use reqwest::{Certificate, Client, Identity, Method, Request, Url};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

use crate::config::TlsConfig;
use crate::errors::ConfigError;
use crate::REQUEST_ID_HEADER;

pub const GZIP_ENCODING: &str = "gzip";

/// Immutable description of where and how a kind of request is sent.
///
/// Every send builds a fresh [`Request`] from the template, so an endpoint can
/// be shared by concurrent publishers.
#[derive(Debug, Clone)]
pub struct Endpoint {
    url: Url,
    method: Method,
    headers: HeaderMap,
}

impl Endpoint {
    pub fn new(
        base: &str,
        path: &str,
        method: &str,
        params: &HashMap<String, String>,
        headers: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let raw = if path.is_empty() {
            base.trim().to_string()
        } else {
            format!(
                "{}/{}",
                base.trim().trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };
        let mut url = Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl {
                url: raw,
                reason: "expected an http(s) url with a host".to_string(),
            });
        }
        if !params.is_empty() {
            let sorted: BTreeMap<&String, &String> = params.iter().collect();
            url.query_pairs_mut().extend_pairs(sorted);
        }

        let method = Method::from_bytes(method.trim().to_uppercase().as_bytes())
            .map_err(|_| ConfigError::InvalidMethod(method.to_string()))?;

        let mut header_map = HeaderMap::new();
        let sorted: BTreeMap<&String, &String> = headers.iter().collect();
        for (name, value) in sorted {
            let invalid = |reason: String| ConfigError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            header_map.append(header_name, header_value);
        }
        header_map
            .entry(ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));

        Ok(Endpoint {
            url,
            method,
            headers: header_map,
        })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Builds a request carrying `body`, its content headers and a new request id.
    #[must_use]
    pub fn request(&self, body: Vec<u8>, content_type: &'static str, compressed: bool) -> Request {
        let mut request = Request::new(self.method.clone(), self.url.clone());
        let headers = request.headers_mut();
        headers.clone_from(&self.headers);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        if compressed {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static(GZIP_ENCODING));
        }
        if let Ok(id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            headers.insert(REQUEST_ID_HEADER, id);
        }
        *request.body_mut() = Some(body.into());
        request
    }
}

/// Returns the request id set by [`Endpoint::request`].
#[must_use]
pub fn request_id(request: &Request) -> &str {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

pub fn build_client(
    timeout: Duration,
    keep_alive: Duration,
    tls: &TlsConfig,
) -> Result<Client, ConfigError> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .tcp_keepalive(keep_alive)
        .pool_idle_timeout(keep_alive);

    if let Some(path) = &tls.ca_cert_path {
        let pem = std::fs::read(path)
            .map_err(|e| ConfigError::Tls(format!("fail to read {}: {e}", path.display())))?;
        let certificates = Certificate::from_pem_bundle(&pem)
            .map_err(|e| ConfigError::Tls(format!("invalid ca {}: {e}", path.display())))?;
        for certificate in certificates {
            builder = builder.add_root_certificate(certificate);
        }
    }

    match (&tls.certificate_path, &tls.key_path) {
        (Some(cert_path), Some(key_path)) => {
            let mut pem = std::fs::read(cert_path).map_err(|e| {
                ConfigError::Tls(format!("fail to read {}: {e}", cert_path.display()))
            })?;
            let key = std::fs::read(key_path).map_err(|e| {
                ConfigError::Tls(format!("fail to read {}: {e}", key_path.display()))
            })?;
            pem.push(b'\n');
            pem.extend_from_slice(&key);
            let identity = Identity::from_pem(&pem)
                .map_err(|e| ConfigError::Tls(format!("invalid client certificate: {e}")))?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(ConfigError::Tls(
                "certificate_path and key_path must be set together".to_string(),
            ))
        }
    }

    if tls.insecure_skip_verify {
        builder = builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    Ok(builder.build()?)
}

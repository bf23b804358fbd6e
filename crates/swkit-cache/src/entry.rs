//! Stored request/response pairs.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use swkit_net::{Request, Response};
use url::Url;

use crate::StorageError;

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request identity (`"GET <url>"`).
    pub key: String,

    /// Request URL.
    pub url: String,

    /// Final response URL, when a redirect moved it away from `url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_url: Option<String>,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order; repeated names are kept. Values are raw
    /// bytes, base64 in JSON.
    #[serde(with = "header_values_base64")]
    pub headers: Vec<(String, Bytes)>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot `response` as the stored answer for `request`.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Bytes::copy_from_slice(value.as_bytes()),
                )
            })
            .collect();
        let response_url = (response.url != request.url).then(|| response.url.to_string());

        Self {
            key: request.cache_key(),
            url: request.url.to_string(),
            response_url,
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild the stored response, flagged as served from cache.
    pub fn to_response(&self) -> Result<Response, StorageError> {
        let url = Url::parse(self.response_url.as_deref().unwrap_or(&self.url))
            .map_err(|e| StorageError::corrupt(format!("{}: bad url: {e}", self.key)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| StorageError::corrupt(format!("{}: bad status: {e}", self.key)))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StorageError::corrupt(format!("{}: bad header: {e}", self.key)))?;
            let value = HeaderValue::from_bytes(value)
                .map_err(|e| StorageError::corrupt(format!("{}: bad header: {e}", self.key)))?;
            headers.append(name, value);
        }

        Ok(Response::new(url, status, headers, self.body.clone()).cached())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

mod header_values_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        headers: &[(String, Bytes)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        headers
            .iter()
            .map(|(name, value)| (name.as_str(), STANDARD.encode(value)))
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, Bytes)>, D::Error> {
        Vec::<(String, String)>::deserialize(deserializer)?
            .into_iter()
            .map(|(name, encoded)| {
                STANDARD
                    .decode(encoded.as_bytes())
                    .map(|value| (name, Bytes::from(value)))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

// Bridge HTTP client
//
// Wraps `reqwest::Client` with CLIP v2 URL construction, the
// application-key header, and envelope unwrapping. The event stream
// module reuses the same base URL and key through `open_event_stream`.

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{ClipResponse, ResourceRef, ResourceType};
use crate::transport::TransportConfig;

const APP_KEY_HEADER: &str = "hue-application-key";

/// Raw HTTP client for one bridge.
///
/// Cheap to clone: both inner `reqwest::Client`s are reference counted.
/// All methods return unwrapped `data` payloads -- the envelope is
/// stripped before the caller sees it.
#[derive(Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: Url,
    app_key: SecretString,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl BridgeClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the bridge root, e.g. `https://192.168.1.20`.
    pub fn new(
        base_url: Url,
        app_key: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            stream_http: transport.build_stream_client()?,
            base_url: normalize_base(base_url),
            app_key,
        })
    }

    /// Create a client around a pre-built `reqwest::Client`, used for
    /// both resource requests and the event stream.
    pub fn from_reqwest(
        base_url: &str,
        app_key: SecretString,
        http: reqwest::Client,
    ) -> Result<Self, Error> {
        let base_url = Url::parse(base_url)?;
        Ok(Self {
            stream_http: http.clone(),
            http,
            base_url: normalize_base(base_url),
            app_key,
        })
    }

    /// The bridge base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    fn resource_url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(&format!("clip/v2/resource/{path}"))?)
    }

    fn event_stream_url(&self) -> Result<Url, Error> {
        Ok(self.base_url.join("eventstream/clip/v2")?)
    }

    // ── Resource endpoints ───────────────────────────────────────────

    /// Fetch the whole collection for one resource type.
    pub async fn list_resources(&self, resource_type: ResourceType) -> Result<Vec<Value>, Error> {
        let url = self.resource_url(resource_type.as_ref())?;
        self.get(url).await
    }

    /// Fetch a single resource by id. `Ok(None)` if the bridge returns no data.
    pub async fn get_resource(
        &self,
        resource_type: ResourceType,
        id: &str,
    ) -> Result<Option<Value>, Error> {
        let url = self.resource_url(&format!("{}/{id}", resource_type.as_ref()))?;
        let data: Vec<Value> = self.get(url).await?;
        Ok(data.into_iter().next())
    }

    /// Fetch a single device's metadata.
    pub async fn get_device(&self, id: &str) -> Result<Option<Value>, Error> {
        self.get_resource(ResourceType::Device, id).await
    }

    /// Apply a partial update to a resource.
    pub async fn update_resource(
        &self,
        resource_type: ResourceType,
        id: &str,
        body: &Value,
    ) -> Result<Vec<ResourceRef>, Error> {
        let url = self.resource_url(&format!("{}/{id}", resource_type.as_ref()))?;
        debug!("PUT {}", url);

        let resp = self
            .http
            .put(url)
            .header(APP_KEY_HEADER, self.app_key.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        parse_envelope(resp).await
    }

    /// Open the server-sent event stream, returning the streaming response.
    pub(crate) async fn open_event_stream(&self) -> Result<reqwest::Response, Error> {
        let url = self.event_stream_url()?;
        debug!("GET {}", url);

        let resp = self
            .stream_http
            .get(url)
            .header(APP_KEY_HEADER, self.app_key.expose_secret())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::EventStream(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(Error::Authentication {
                message: "event stream rejected the application key".into(),
            });
        }
        if !status.is_success() {
            return Err(Error::EventStream(format!("HTTP {status}")));
        }
        Ok(resp)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .header(APP_KEY_HEADER, self.app_key.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(Error::Transport)?;

        parse_envelope(resp).await
    }
}

/// `Url::join` drops the last path segment unless the base ends in `/`.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Map HTTP status and the `{ errors, data }` envelope onto `Error`.
async fn parse_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<Vec<T>, Error> {
    let status = resp.status();
    let path = resp.url().path().to_owned();

    match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            return Err(Error::Authentication {
                message: "application key rejected by bridge".into(),
            });
        }
        reqwest::StatusCode::NOT_FOUND => return Err(Error::NotFound { path }),
        reqwest::StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            return Err(Error::RateLimited { retry_after_secs });
        }
        _ => {}
    }

    let body = resp.text().await.map_err(Error::Transport)?;

    let envelope: ClipResponse<T> = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(e) if status.is_success() => {
            return Err(Error::Deserialization {
                message: e.to_string(),
                body,
            });
        }
        Err(_) => {
            let message = body.trim();
            return Err(Error::Bridge {
                status: status.as_u16(),
                message: if message.is_empty() {
                    format!("HTTP {status}")
                } else {
                    message.to_owned()
                },
            });
        }
    };

    if let Some(message) = envelope.error_text() {
        return Err(Error::Bridge {
            status: status.as_u16(),
            message,
        });
    }
    if !status.is_success() {
        return Err(Error::Bridge {
            status: status.as_u16(),
            message: format!("HTTP {status}"),
        });
    }

    Ok(envelope.data)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = normalize_base(Url::parse("https://10.0.0.2/bridge").unwrap());
        assert_eq!(url.as_str(), "https://10.0.0.2/bridge/");
        let root = normalize_base(Url::parse("https://10.0.0.2").unwrap());
        assert_eq!(root.as_str(), "https://10.0.0.2/");
    }

    #[test]
    fn resource_urls() {
        let client = BridgeClient::from_reqwest(
            "https://10.0.0.2",
            SecretString::from("key".to_owned()),
            reqwest::Client::new(),
        )
        .unwrap();
        assert_eq!(
            client.resource_url("light/abc").unwrap().as_str(),
            "https://10.0.0.2/clip/v2/resource/light/abc"
        );
        assert_eq!(
            client.event_stream_url().unwrap().as_str(),
            "https://10.0.0.2/eventstream/clip/v2"
        );
    }
}

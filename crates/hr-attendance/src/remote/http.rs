use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::payload::{attendance_path, Ack, AttendancePayload, EmployeeRecord, Envelope};
use super::{HrApi, RemoteError};
use crate::config::RemoteConfig;
use crate::workflows::attendance::{Direction, EmployeeId, ShiftDefinition};

/// reqwest-backed client carrying the kiosk's static Basic credential.
#[derive(Clone)]
pub struct HttpHrClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl std::fmt::Debug for HttpHrClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpHrClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpHrClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| RemoteError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }

    /// Photos hosted elsewhere must not receive the service credential.
    fn photo_request(&self, url: &str) -> RequestBuilder {
        match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                let trusted = self.is_service_url(&parsed);
                let request = self.client.get(parsed);
                if trusted {
                    self.authorized(request)
                } else {
                    request
                }
            }
            _ => {
                let path = if url.starts_with('/') {
                    url.to_string()
                } else {
                    format!("/{url}")
                };
                self.authorized(self.client.get(self.url(&path)))
            }
        }
    }

    /// Same scheme, host and port as the base URL, under its path.
    fn is_service_url(&self, url: &Url) -> bool {
        let Ok(base) = Url::parse(&self.base_url) else {
            return false;
        };
        if base.scheme() != url.scheme()
            || base.host_str() != url.host_str()
            || base.port_or_known_default() != url.port_or_known_default()
        {
            return false;
        }

        let prefix = base.path().trim_end_matches('/');
        let path = url.path();
        prefix.is_empty()
            || path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.json::<Value>().await.ok();
        warn!(status = status.as_u16(), "hr service rejected request");
        Err(RemoteError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn read_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))
    }
}

#[async_trait]
impl HrApi for HttpHrClient {
    async fn fetch_employee(&self, id: &EmployeeId) -> Result<EmployeeRecord, RemoteError> {
        let url = self.url(&format!("/employee/{}", id.0));
        debug!(employee_id = %id, "fetching employee record");
        let envelope: Envelope<EmployeeRecord> =
            self.read_json(self.authorized(self.client.get(url))).await?;
        Ok(envelope.data)
    }

    async fn fetch_photo(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let response = self.send(self.photo_request(url)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn list_active_shifts(
        &self,
        company_id: &str,
    ) -> Result<Vec<ShiftDefinition>, RemoteError> {
        let request = self
            .authorized(self.client.get(self.url("/shift-active")))
            .query(&[("company_id", company_id)]);
        let envelope: Envelope<Value> = self.read_json(request).await?;

        match envelope.data {
            Value::Array(_) => serde_json::from_value(envelope.data)
                .map_err(|err| RemoteError::Decode(err.to_string())),
            other => Err(RemoteError::Decode(format!(
                "expected an array of shifts, got {}",
                json_kind(&other)
            ))),
        }
    }

    async fn record_attendance(
        &self,
        direction: Direction,
        payload: &AttendancePayload,
    ) -> Result<Ack, RemoteError> {
        let request = self
            .authorized(self.client.post(self.url(attendance_path(direction))))
            .json(payload);
        let response = self.send(request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RemoteError::Transport(err.to_string()))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Ack::default());
        }
        // A 2xx is an acknowledgement even when the body is not the usual shape.
        Ok(serde_json::from_slice::<Ack>(&bytes).unwrap_or_default())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

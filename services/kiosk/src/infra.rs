use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveTime;
use hr_attendance::config::AppConfig;
use hr_attendance::error::AppError;
use hr_attendance::remote::{HttpHrClient, RemoteError};
use hr_attendance::workflows::attendance::form::parse_time as parse_form_time;
use hr_attendance::workflows::attendance::{
    CameraArbiter, CameraDevice, CodeDecoder, DecodeError, DeviceError, EngineError, ExitStatus,
    FaceDescriptor, FaceEngine, FixedLocation, FlowKind, Frame, PipelineDeps, PipelineSlot,
    Punctuality, ReferenceCache, SystemClock,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

/// File the capture daemon overwrites with the most recent frame.
pub(crate) const LATEST_FRAME: &str = "latest.jpg";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Shared by the attendance routes: device wiring plus the single active pipeline.
#[derive(Clone)]
pub(crate) struct KioskState {
    pub(crate) deps: PipelineDeps,
    pub(crate) slot: Arc<PipelineSlot>,
}

impl KioskState {
    pub(crate) fn new(deps: PipelineDeps) -> Self {
        Self {
            deps,
            slot: Arc::new(PipelineSlot::new()),
        }
    }
}

pub(crate) fn build_pipeline_deps(config: &AppConfig) -> Result<PipelineDeps, AppError> {
    let api = HttpHrClient::new(&config.remote)?;
    let vision = Arc::new(VisionSidecar::new(
        &config.devices.vision_base_url,
        config.remote.timeout,
    )?);
    let camera = SpoolDirectoryCamera::new(config.devices.camera_spool_dir.clone());

    Ok(PipelineDeps {
        api: Arc::new(api),
        camera: CameraArbiter::new(Arc::new(camera)),
        face_engine: vision.clone(),
        decoder: vision,
        location: Arc::new(FixedLocation::new(config.devices.fixed_location)),
        clock: Arc::new(SystemClock),
        references: ReferenceCache::new(),
        config: config.pipeline.clone(),
    })
}

/// Reads frames that a capture daemon spools to disk.
#[derive(Debug, Clone)]
pub(crate) struct SpoolDirectoryCamera {
    dir: PathBuf,
}

impl SpoolDirectoryCamera {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl CameraDevice for SpoolDirectoryCamera {
    async fn open(&self) -> Result<(), DeviceError> {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(DeviceError::Unavailable(format!(
                "{} is not a directory",
                self.dir.display()
            ))),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                Err(DeviceError::PermissionDenied)
            }
            Err(err) => Err(DeviceError::Unavailable(format!(
                "{}: {err}",
                self.dir.display()
            ))),
        }
    }

    async fn capture(&self) -> Result<Frame, DeviceError> {
        let path = self.dir.join(LATEST_FRAME);
        let bytes = tokio::fs::read(&path).await.map_err(|err| match err.kind() {
            ErrorKind::PermissionDenied => DeviceError::PermissionDenied,
            _ => DeviceError::CaptureFailed(format!("{}: {err}", path.display())),
        })?;

        if bytes.is_empty() {
            return Err(DeviceError::CaptureFailed("empty frame".to_string()));
        }
        Ok(Frame::new(bytes))
    }

    fn close(&self) {
        debug!(dir = %self.dir.display(), "camera spool released");
    }
}

#[derive(Debug, Deserialize)]
struct DescriptorResponse {
    #[serde(default)]
    faces: Vec<DetectedFace>,
}

#[derive(Debug, Deserialize)]
struct DetectedFace {
    descriptor: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct DecodeResponse {
    #[serde(default)]
    text: Option<String>,
}

enum SidecarError {
    Unavailable(String),
    Rejected(String),
}

impl From<SidecarError> for EngineError {
    fn from(value: SidecarError) -> Self {
        match value {
            SidecarError::Unavailable(reason) => EngineError::Unavailable(reason),
            SidecarError::Rejected(reason) => EngineError::InvalidImage(reason),
        }
    }
}

impl From<SidecarError> for DecodeError {
    fn from(value: SidecarError) -> Self {
        match value {
            SidecarError::Unavailable(reason) => DecodeError::Unavailable(reason),
            SidecarError::Rejected(reason) => DecodeError::InvalidImage(reason),
        }
    }
}

/// Local vision process providing face descriptors and optical-code decoding.
#[derive(Debug, Clone)]
pub(crate) struct VisionSidecar {
    client: reqwest::Client,
    base_url: String,
}

impl VisionSidecar {
    pub(crate) fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RemoteError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_image<T: DeserializeOwned>(
        &self,
        path: &str,
        image: &[u8],
    ) -> Result<T, SidecarError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(wiped_on_drop(image))
            .send()
            .await
            .map_err(|err| SidecarError::Unavailable(err.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let reason = response.text().await.unwrap_or_default();
            return Err(SidecarError::Rejected(format!("{status}: {reason}")));
        }
        if !status.is_success() {
            return Err(SidecarError::Unavailable(format!("vision sidecar returned {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| SidecarError::Unavailable(err.to_string()))
    }
}

/// Owned copy of a frame for a request body, zeroed when reqwest drops its last handle.
fn wiped_on_drop(image: &[u8]) -> Bytes {
    Bytes::from_owner(Zeroizing::new(image.to_vec()))
}

#[async_trait]
impl FaceEngine for VisionSidecar {
    async fn describe_single_face(
        &self,
        image: &[u8],
    ) -> Result<Option<FaceDescriptor>, EngineError> {
        let response: DescriptorResponse = self.post_image("/faces/descriptor", image).await?;
        let Some(face) = response.faces.into_iter().next() else {
            return Ok(None);
        };
        FaceDescriptor::new(face.descriptor)
            .map(Some)
            .map_err(|err| EngineError::InvalidImage(err.to_string()))
    }
}

#[async_trait]
impl CodeDecoder for VisionSidecar {
    async fn decode(&self, image: &[u8]) -> Result<Option<String>, DecodeError> {
        let response: DecodeResponse = self.post_image("/codes/decode", image).await?;
        Ok(response.text)
    }
}

fn parse_named<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T, String> {
    let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
    serde_json::from_value(serde_json::Value::String(normalized))
        .map_err(|_| format!("'{raw}' is not a valid {what}"))
}

pub(crate) fn parse_flow(raw: &str) -> Result<FlowKind, String> {
    parse_named(raw, "flow (entry, exit, daily)")
}

pub(crate) fn parse_exit_status(raw: &str) -> Result<ExitStatus, String> {
    parse_named(raw, "exit status (regular-departure, permitted-leave, sick)")
}

pub(crate) fn parse_punctuality(raw: &str) -> Result<Punctuality, String> {
    parse_named(raw, "punctuality (on-time, late)")
}

pub(crate) fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    parse_form_time(raw)
}

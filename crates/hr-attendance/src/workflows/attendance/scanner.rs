use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use super::camera::{CameraLease, DeviceError};
use super::domain::IdentityToken;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("code decoder unavailable: {0}")]
    Unavailable(String),
    #[error("frame could not be decoded: {0}")]
    InvalidImage(String),
}

/// Optical-code reader (QR or barcode) applied to camera frames.
#[async_trait]
pub trait CodeDecoder: Send + Sync {
    async fn decode(&self, image: &[u8]) -> Result<Option<String>, DecodeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    DecodeFailed { attempt: u32, reason: String },
    Decoded { attempt: u32, token: IdentityToken },
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ScanError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("scan cancelled")]
    Cancelled,
    #[error("scanner is no longer active")]
    Inactive,
}

#[derive(Clone)]
pub struct IdentityScanner {
    decoder: Arc<dyn CodeDecoder>,
    interval: Duration,
}

impl std::fmt::Debug for IdentityScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityScanner")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl IdentityScanner {
    pub fn new(decoder: Arc<dyn CodeDecoder>, interval: Duration) -> Self {
        Self { decoder, interval }
    }

    /// Start pulling frames from the leased camera.
    pub fn activate(&self, lease: CameraLease) -> ScanSession {
        info!("identity scanner activated");
        ScanSession {
            decoder: Arc::clone(&self.decoder),
            interval: self.interval,
            lease: Some(lease),
            attempts: 0,
        }
    }

    /// Scan until the first successful decode or until `cancel` flips to `true`.
    pub async fn scan(
        &self,
        lease: CameraLease,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<IdentityToken, ScanError> {
        if *cancel.borrow() {
            return Err(ScanError::Cancelled);
        }

        let mut session = self.activate(lease);
        loop {
            let event = tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Err(ScanError::Cancelled);
                    }
                    continue;
                }
                event = session.next_event() => event?,
            };

            match event {
                Some(ScanEvent::Decoded { token, .. }) => return Ok(token),
                Some(ScanEvent::DecodeFailed { attempt, reason }) => {
                    debug!(attempt, %reason, "no code in frame");
                }
                None => return Err(ScanError::Inactive),
            }
        }
    }
}

/// Pull-based stream of scan events; deactivates itself after the first decode.
pub struct ScanSession {
    decoder: Arc<dyn CodeDecoder>,
    interval: Duration,
    lease: Option<CameraLease>,
    attempts: u32,
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("active", &self.is_active())
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl ScanSession {
    pub fn is_active(&self) -> bool {
        self.lease.is_some()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Next decode attempt. Returns `Ok(None)` once the session is inactive.
    pub async fn next_event(&mut self) -> Result<Option<ScanEvent>, ScanError> {
        let Some(lease) = self.lease.as_ref() else {
            return Ok(None);
        };

        if self.attempts > 0 && !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        self.attempts += 1;
        let attempt = self.attempts;

        let frame = match lease.capture().await {
            Ok(frame) => frame,
            Err(err) => {
                self.deactivate();
                return Err(err.into());
            }
        };

        let decoded = self.decoder.decode(frame.bytes()).await;
        drop(frame);

        let event = match decoded {
            Ok(Some(text)) if !text.trim().is_empty() => {
                self.deactivate();
                ScanEvent::Decoded {
                    attempt,
                    token: IdentityToken(text.trim().to_string()),
                }
            }
            Ok(_) => ScanEvent::DecodeFailed {
                attempt,
                reason: "no code found".to_string(),
            },
            Err(err) => ScanEvent::DecodeFailed {
                attempt,
                reason: err.to_string(),
            },
        };
        Ok(Some(event))
    }

    /// Stop scanning and hand the camera back.
    pub fn deactivate(&mut self) {
        if self.lease.take().is_some() {
            info!(attempts = self.attempts, "identity scanner deactivated");
        }
    }
}

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// A single encoded frame pulled from the camera.
///
/// The buffer is zeroed on drop so a live capture leaves nothing behind once its
/// match decision has been made.
pub struct Frame {
    bytes: Zeroizing<Vec<u8>>,
}

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraConsumer {
    Biometric,
    Scanner,
}

impl CameraConsumer {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Biometric => "biometric",
            Self::Scanner => "scanner",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("camera access was denied")]
    PermissionDenied,
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("camera is already in use")]
    Busy,
    #[error("camera capture failed: {0}")]
    CaptureFailed(String),
}

/// Platform camera driver.
///
/// `close` must tolerate being called on a stream that never finished opening.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn open(&self) -> Result<(), DeviceError>;
    async fn capture(&self) -> Result<Frame, DeviceError>;
    fn close(&self);
}

/// Hands out the camera to one consumer at a time.
#[derive(Clone)]
pub struct CameraArbiter {
    device: Arc<dyn CameraDevice>,
    slot: Arc<Semaphore>,
}

impl fmt::Debug for CameraArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraArbiter")
            .field("held", &self.is_held())
            .finish_non_exhaustive()
    }
}

impl CameraArbiter {
    pub fn new(device: Arc<dyn CameraDevice>) -> Self {
        Self {
            device,
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub async fn acquire(&self, consumer: CameraConsumer) -> Result<CameraLease, DeviceError> {
        let permit = self
            .slot
            .clone()
            .try_acquire_owned()
            .map_err(|_| DeviceError::Busy)?;

        // The lease exists before the stream opens so a failed or abandoned open still closes it.
        let lease = CameraLease {
            device: Arc::clone(&self.device),
            consumer,
            _permit: permit,
        };

        if let Err(err) = self.device.open().await {
            warn!(consumer = consumer.label(), error = %err, "camera acquisition failed");
            return Err(err);
        }

        info!(consumer = consumer.label(), "camera acquired");
        Ok(lease)
    }

    pub fn is_held(&self) -> bool {
        self.slot.available_permits() == 0
    }
}

/// Exclusive camera ownership; the stream is closed when the lease is dropped.
pub struct CameraLease {
    device: Arc<dyn CameraDevice>,
    consumer: CameraConsumer,
    _permit: OwnedSemaphorePermit,
}

impl CameraLease {
    pub fn consumer(&self) -> CameraConsumer {
        self.consumer
    }

    pub async fn capture(&self) -> Result<Frame, DeviceError> {
        self.device.capture().await
    }

    /// Explicit hand-back; equivalent to dropping the lease.
    pub fn release(self) {}
}

impl fmt::Debug for CameraLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraLease")
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.device.close();
        debug!(consumer = self.consumer.label(), "camera released");
    }
}

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use super::pipeline::{AttendancePipeline, PipelineCanceller};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("no attendance flow is active")]
    Empty,
    #[error("attendance flow {id} was replaced; its result was discarded")]
    Superseded { id: u64 },
}

/// Shared handle to the pipeline that was current when it was taken.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    id: u64,
    pipeline: Arc<AsyncMutex<AttendancePipeline>>,
}

impl PipelineHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pipeline(&self) -> &Arc<AsyncMutex<AttendancePipeline>> {
        &self.pipeline
    }
}

struct Installed {
    handle: PipelineHandle,
    canceller: PipelineCanceller,
}

/// At most one pipeline per kiosk session.
#[derive(Default)]
pub struct PipelineSlot {
    current: Mutex<Option<Installed>>,
}

impl std::fmt::Debug for PipelineSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSlot")
            .field("current", &self.current_id())
            .finish()
    }
}

impl PipelineSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `pipeline` current. A previous pipeline is signalled to cancel.
    pub fn install(&self, pipeline: AttendancePipeline) -> PipelineHandle {
        let canceller = pipeline.canceller();
        let handle = PipelineHandle {
            id: pipeline.id(),
            pipeline: Arc::new(AsyncMutex::new(pipeline)),
        };

        let previous = self.lock().replace(Installed {
            handle: handle.clone(),
            canceller,
        });
        if let Some(previous) = previous {
            previous.canceller.cancel();
            info!(previous = previous.handle.id, current = handle.id, "attendance pipeline replaced");
        }
        handle
    }

    pub fn current(&self) -> Result<PipelineHandle, SlotError> {
        self.lock()
            .as_ref()
            .map(|installed| installed.handle.clone())
            .ok_or(SlotError::Empty)
    }

    pub fn current_id(&self) -> Option<u64> {
        self.lock().as_ref().map(|installed| installed.handle.id)
    }

    pub fn is_current(&self, id: u64) -> bool {
        self.current_id() == Some(id)
    }

    /// Pass `value` through only if pipeline `id` is still the current one.
    pub fn accept<T>(&self, id: u64, value: T) -> Result<T, SlotError> {
        if self.is_current(id) {
            Ok(value)
        } else {
            debug!(pipeline = id, "discarding result from superseded pipeline");
            Err(SlotError::Superseded { id })
        }
    }

    /// Cancel and remove the current pipeline, waiting for it to release the camera.
    pub async fn retire(&self) -> Option<u64> {
        let installed = self.lock().take()?;
        installed.canceller.cancel();

        let mut pipeline = installed.handle.pipeline.lock().await;
        pipeline.cancel();
        info!(pipeline = installed.handle.id, "attendance pipeline retired");
        Some(installed.handle.id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Installed>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

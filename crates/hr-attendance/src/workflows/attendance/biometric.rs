use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::camera::Frame;
use super::domain::EmployeeId;
use crate::remote::{HrApi, RemoteError};

/// Label reported when the live face does not match the reference.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Fixed-size face embedding compared by Euclidean distance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FaceDescriptor(Vec<f32>);

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Result<Self, BiometricError> {
        if values.is_empty() || values.iter().any(|value| !value.is_finite()) {
            return Err(BiometricError::InvalidDescriptor);
        }
        Ok(Self(values))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn distance(&self, other: &FaceDescriptor) -> Result<f32, BiometricError> {
        if self.len() != other.len() {
            return Err(BiometricError::DescriptorMismatch {
                expected: other.len(),
                actual: self.len(),
            });
        }

        let sum: f32 = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        Ok(sum.sqrt())
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("face engine unavailable: {0}")]
    Unavailable(String),
    #[error("image could not be decoded: {0}")]
    InvalidImage(String),
}

/// External recognition capability: detect at most one face and describe it.
#[async_trait]
pub trait FaceEngine: Send + Sync {
    async fn describe_single_face(
        &self,
        image: &[u8],
    ) -> Result<Option<FaceDescriptor>, EngineError>;
}

/// Descriptor derived once from the employee's stored photo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceFace {
    pub employee_id: EmployeeId,
    pub label: String,
    pub descriptor: FaceDescriptor,
}

/// Reference faces shared by every pipeline a kiosk starts, keyed by employee.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCache {
    faces: Arc<Mutex<HashMap<EmployeeId, ReferenceFace>>>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, employee_id: &EmployeeId) -> Option<ReferenceFace> {
        self.lock().get(employee_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn insert(&self, reference: ReferenceFace) {
        self.lock().insert(reference.employee_id.clone(), reference);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EmployeeId, ReferenceFace>> {
        self.faces.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One camera frame taken for a single verify attempt; consumed by [`BiometricVerifier::verify`].
#[derive(Debug)]
pub struct LiveCapture {
    frame: Frame,
}

impl LiveCapture {
    pub fn new(frame: Frame) -> Self {
        Self { frame }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MatchRejection {
    NoFaceDetected,
    DistanceAboveThreshold { distance: f32, threshold: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub matched: bool,
    pub label: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<MatchRejection>,
}

impl MatchOutcome {
    fn no_face() -> Self {
        Self {
            matched: false,
            label: UNKNOWN_LABEL.to_string(),
            confidence: 0.0,
            rejection: Some(MatchRejection::NoFaceDetected),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BiometricError {
    #[error("no face detected in the stored photo of employee {employee_id}")]
    NoFaceDetected { employee_id: EmployeeId },
    #[error("employee {employee_id} has no stored photo")]
    MissingPhoto { employee_id: EmployeeId },
    #[error("failed to fetch the stored photo: {0}")]
    Fetch(#[from] RemoteError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("descriptor length {actual} does not match reference length {expected}")]
    DescriptorMismatch { expected: usize, actual: usize },
    #[error("face engine returned an empty or non-finite descriptor")]
    InvalidDescriptor,
}

/// Nearest-neighbour decision against a single reference.
///
/// A live descriptor matches when its distance is strictly below `threshold`.
pub fn decide(
    live: &FaceDescriptor,
    reference: &ReferenceFace,
    threshold: f32,
) -> Result<MatchOutcome, BiometricError> {
    let distance = live.distance(&reference.descriptor)?;
    let confidence = (1.0 - distance).clamp(0.0, 1.0);

    if distance < threshold {
        Ok(MatchOutcome {
            matched: true,
            label: reference.label.clone(),
            confidence,
            rejection: None,
        })
    } else {
        Ok(MatchOutcome {
            matched: false,
            label: UNKNOWN_LABEL.to_string(),
            confidence,
            rejection: Some(MatchRejection::DistanceAboveThreshold {
                distance,
                threshold,
            }),
        })
    }
}

pub struct BiometricVerifier {
    api: Arc<dyn HrApi>,
    engine: Arc<dyn FaceEngine>,
    threshold: f32,
    references: ReferenceCache,
}

impl BiometricVerifier {
    pub fn new(
        api: Arc<dyn HrApi>,
        engine: Arc<dyn FaceEngine>,
        threshold: f32,
        references: ReferenceCache,
    ) -> Self {
        Self {
            api,
            engine,
            threshold,
            references,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Fetch the stored photo and derive its descriptor; cached per employee.
    pub async fn load_reference(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<ReferenceFace, BiometricError> {
        if let Some(reference) = self.references.get(employee_id) {
            debug!(employee_id = %employee_id, "reference face served from cache");
            return Ok(reference);
        }

        let record = self.api.fetch_employee(employee_id).await?;
        let photo_url = record
            .photo_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| BiometricError::MissingPhoto {
                employee_id: employee_id.clone(),
            })?;

        let photo = self.api.fetch_photo(photo_url).await?;
        let descriptor = self
            .engine
            .describe_single_face(&photo)
            .await?
            .ok_or_else(|| {
                warn!(employee_id = %employee_id, "stored photo has no detectable face");
                BiometricError::NoFaceDetected {
                    employee_id: employee_id.clone(),
                }
            })?;

        let label = if record.name.trim().is_empty() {
            employee_id.0.clone()
        } else {
            record.name.trim().to_string()
        };

        let reference = ReferenceFace {
            employee_id: employee_id.clone(),
            label,
            descriptor,
        };
        info!(employee_id = %employee_id, dims = reference.descriptor.len(), "reference face loaded");
        self.references.insert(reference.clone());
        Ok(reference)
    }

    /// Compare one live capture against the reference. The capture is dropped before
    /// the decision is returned.
    pub async fn verify(
        &self,
        capture: LiveCapture,
        reference: &ReferenceFace,
    ) -> Result<MatchOutcome, BiometricError> {
        let described = self
            .engine
            .describe_single_face(capture.frame.bytes())
            .await;
        drop(capture);

        let outcome = match described? {
            Some(live) => decide(&live, reference, self.threshold)?,
            None => MatchOutcome::no_face(),
        };

        debug!(
            matched = outcome.matched,
            confidence = outcome.confidence,
            "verify attempt decided"
        );
        Ok(outcome)
    }
}

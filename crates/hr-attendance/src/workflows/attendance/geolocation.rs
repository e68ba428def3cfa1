use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::domain::Coordinates;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
    #[error("location read timed out")]
    Timeout,
}

#[async_trait]
pub trait LocationSensor: Send + Sync {
    async fn current_position(&self) -> Result<Coordinates, LocationError>;
}

/// Best-effort coordinate read; never blocks the pipeline.
#[derive(Clone)]
pub struct GeolocationSource {
    sensor: Arc<dyn LocationSensor>,
    timeout: Duration,
}

impl GeolocationSource {
    pub fn new(sensor: Arc<dyn LocationSensor>, timeout: Duration) -> Self {
        Self { sensor, timeout }
    }

    /// Returns the reading and, when empty, why.
    pub async fn read(&self) -> (Option<Coordinates>, Option<LocationError>) {
        let reading = match tokio::time::timeout(self.timeout, self.sensor.current_position()).await
        {
            Ok(result) => result,
            Err(_) => Err(LocationError::Timeout),
        };

        match reading {
            Ok(coords) => {
                info!(
                    latitude = coords.latitude,
                    longitude = coords.longitude,
                    "location captured"
                );
                (Some(coords), None)
            }
            Err(err) => {
                warn!(error = %err, "continuing without location");
                (None, Some(err))
            }
        }
    }
}

/// Sensor for kiosks mounted at a known site; reports unavailable when unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLocation {
    coords: Option<Coordinates>,
}

impl FixedLocation {
    pub fn new(coords: Option<Coordinates>) -> Self {
        Self { coords }
    }
}

#[async_trait]
impl LocationSensor for FixedLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        self.coords
            .ok_or_else(|| LocationError::Unavailable("no kiosk location configured".to_string()))
    }
}

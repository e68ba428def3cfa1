//! Contract and HTTP adapter for the HR REST service the pipeline reads from and writes to.

pub mod http;
pub mod payload;

use async_trait::async_trait;
use serde_json::Value;

use crate::workflows::attendance::{Direction, EmployeeId, ShiftDefinition};

pub use http::HttpHrClient;
pub use payload::{
    attendance_path, failure_message, flatten_validation_messages, Ack, AttendancePayload,
    EmployeeRecord, Envelope, GENERIC_FAILURE,
};

/// Remote operations consumed by the attendance pipeline.
#[async_trait]
pub trait HrApi: Send + Sync {
    async fn fetch_employee(&self, id: &EmployeeId) -> Result<EmployeeRecord, RemoteError>;

    async fn fetch_photo(&self, url: &str) -> Result<Vec<u8>, RemoteError>;

    async fn list_active_shifts(
        &self,
        company_id: &str,
    ) -> Result<Vec<ShiftDefinition>, RemoteError>;

    async fn record_attendance(
        &self,
        direction: Direction,
        payload: &AttendancePayload,
    ) -> Result<Ack, RemoteError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("hr service unreachable: {0}")]
    Transport(String),
    #[error("hr service responded with status {status}")]
    Status { status: u16, body: Option<Value> },
    #[error("unexpected response from hr service: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Client-side rejection carrying a body the user should see.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Status { status, .. } if (400..500).contains(status))
    }
}

use serde::{Deserialize, Serialize};

use crate::workflows::attendance::EmployeeId;

/// Signed-in kiosk user, handed to each pipeline instead of being read from global state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub company_id: String,
    /// Company-user record whose stored photo anchors the face gate.
    pub employee_id: EmployeeId,
    pub display_name: String,
}

impl Session {
    pub fn new(
        company_id: impl Into<String>,
        employee_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let company_id = company_id.into().trim().to_string();
        let employee_id = employee_id.into().trim().to_string();
        let display_name = display_name.into().trim().to_string();

        if company_id.is_empty() {
            return Err(SessionError::MissingCompany);
        }
        if employee_id.is_empty() {
            return Err(SessionError::MissingEmployee);
        }

        Ok(Self {
            company_id,
            employee_id: EmployeeId(employee_id),
            display_name,
        })
    }

    /// Label used when the reference face matches.
    pub fn match_label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.employee_id.0
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no employee data: session has no company")]
    MissingCompany,
    #[error("no employee data: session has no employee record")]
    MissingEmployee,
}

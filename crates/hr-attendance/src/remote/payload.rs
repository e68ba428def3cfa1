use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflows::attendance::{AttendanceIntent, Direction, EmployeeId};

/// Shown whenever a failure body cannot be interpreted.
pub const GENERIC_FAILURE: &str = "Form submission failed.";

/// Subset of the company-user record the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmployeeRecord {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "foto_karyawan")]
    pub photo_url: Option<String>,
}

impl EmployeeRecord {
    pub fn employee_id(&self) -> EmployeeId {
        EmployeeId(self.id.clone())
    }
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(raw) => Ok(raw),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// The HR service wraps every read in `{ "data": ... }`.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Body for `POST /attendance-entry` and `POST /attendance-exit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendancePayload {
    pub shift_id: String,
    pub employee_id: String,
    pub date: String,
    pub time: String,
    pub latitude: String,
    pub longitude: String,
    pub remark: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl AttendancePayload {
    pub fn from_intent(intent: &AttendanceIntent) -> Self {
        let (latitude, longitude) = match intent.location {
            Some(coords) => (coords.latitude.to_string(), coords.longitude.to_string()),
            None => (String::new(), String::new()),
        };

        Self {
            shift_id: intent.shift_id.0.clone(),
            employee_id: intent.employee.0.clone(),
            date: intent.date.format("%Y-%m-%d").to_string(),
            time: intent.time.format("%H:%M").to_string(),
            latitude,
            longitude,
            remark: intent.remark.clone(),
            status: intent
                .status
                .map(|status| status.wire_value().to_string()),
        }
    }
}

/// Remote route for each half of the cycle.
pub const fn attendance_path(direction: Direction) -> &'static str {
    match direction {
        Direction::Entry => "/attendance-entry",
        Direction::Exit => "/attendance-exit",
    }
}

/// Acknowledgement returned by a successful write.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Ack {
    #[serde(default, deserialize_with = "message_as_text")]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

fn message_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

/// Flattens `{"message": {"field": ["a", "b"]}}` into `"a, b"`.
///
/// Fields are visited in the order the service sent them, then each array in order.
/// Returns `None` when the body does not have exactly that shape or carries no messages.
pub fn flatten_validation_messages(body: &Value) -> Option<String> {
    let fields = body.get("message")?.as_object()?;

    let mut messages = Vec::new();
    for value in fields.values() {
        for entry in value.as_array()? {
            messages.push(entry.as_str()?.trim());
        }
    }

    let messages: Vec<&str> = messages.into_iter().filter(|m| !m.is_empty()).collect();
    if messages.is_empty() {
        None
    } else {
        Some(messages.join(", "))
    }
}

/// User-visible text for a rejected write; never fails.
pub fn failure_message(body: Option<&Value>) -> String {
    let Some(body) = body else {
        return GENERIC_FAILURE.to_string();
    };

    if let Some(flattened) = flatten_validation_messages(body) {
        return flattened;
    }

    match body.get("message").and_then(Value::as_str).map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => GENERIC_FAILURE.to_string(),
    }
}

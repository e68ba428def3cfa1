use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the employee whose stored photo anchors the face gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(pub String);

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier decoded from the employee's optical code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityToken(pub String);

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shift identifiers arrive as numbers or strings depending on the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "ShiftIdRepr", into = "String")]
pub struct ShiftId(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum ShiftIdRepr {
    Number(i64),
    Text(String),
}

impl From<ShiftIdRepr> for ShiftId {
    fn from(value: ShiftIdRepr) -> Self {
        match value {
            ShiftIdRepr::Number(id) => Self(id.to_string()),
            ShiftIdRepr::Text(id) => Self(id.trim().to_string()),
        }
    }
}

impl From<ShiftId> for String {
    fn from(value: ShiftId) -> Self {
        value.0
    }
}

impl fmt::Display for ShiftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftDefinition {
    pub id: ShiftId,
    pub name: String,
    /// Upstream bounds; displayed only, never used to derive punctuality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

/// Active shifts fetched once per form instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShiftCatalog {
    shifts: Vec<ShiftDefinition>,
}

impl ShiftCatalog {
    pub fn new(shifts: Vec<ShiftDefinition>) -> Self {
        Self { shifts }
    }

    pub fn contains(&self, id: &ShiftId) -> bool {
        self.shifts.iter().any(|shift| &shift.id == id)
    }

    pub fn get(&self, id: &ShiftId) -> Option<&ShiftDefinition> {
        self.shifts.iter().find(|shift| &shift.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty()
    }

    pub fn shifts(&self) -> &[ShiftDefinition] {
        &self.shifts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Which half of the daily attendance cycle a submission represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Entry,
    Exit,
}

impl Direction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Entry => "Entry",
            Self::Exit => "Exit",
        }
    }
}

/// What a single pipeline instance records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Entry,
    Exit,
    /// Entry and exit issued together from one flow.
    Daily,
}

impl FlowKind {
    pub const fn needs_exit_status(self) -> bool {
        matches!(self, Self::Exit | Self::Daily)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Entry => "Check-in",
            Self::Exit => "Check-out",
            Self::Daily => "Daily attendance",
        }
    }
}

/// Required status for the exit half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    RegularDeparture,
    PermittedLeave,
    Sick,
}

impl ExitStatus {
    pub const fn ordered() -> [Self; 3] {
        [Self::RegularDeparture, Self::PermittedLeave, Self::Sick]
    }

    /// Value stored by the HR service.
    pub const fn wire_value(self) -> &'static str {
        match self {
            Self::RegularDeparture => "Pulang Kerja",
            Self::PermittedLeave => "Izin",
            Self::Sick => "Sakit",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::RegularDeparture => "Regular departure",
            Self::PermittedLeave => "Early leave with permission",
            Self::Sick => "Sick",
        }
    }
}

/// Optional, user-selected punctuality for the entry half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Punctuality {
    OnTime,
    Late,
}

impl Punctuality {
    pub const fn wire_value(self) -> &'static str {
        match self {
            Self::OnTime => "Tepat Waktu",
            Self::Late => "Terlambat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Entry(Punctuality),
    Exit(ExitStatus),
}

impl AttendanceStatus {
    pub const fn wire_value(self) -> &'static str {
        match self {
            Self::Entry(punctuality) => punctuality.wire_value(),
            Self::Exit(status) => status.wire_value(),
        }
    }
}

/// Transient record assembled across the gates and submitted once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceIntent {
    pub employee: IdentityToken,
    pub shift_id: ShiftId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub location: Option<Coordinates>,
    pub remark: String,
    pub direction: Direction,
    pub status: Option<AttendanceStatus>,
}

/// Ordered pair for a combined flow; entry is always attempted first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCycle {
    pub entry: AttendanceIntent,
    pub exit: AttendanceIntent,
}

/// What the form hands to the submission coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionPlan {
    Single(AttendanceIntent),
    Daily(DailyCycle),
}

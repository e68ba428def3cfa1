use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, Value};

use crate::config::PipelineConfig;
use crate::remote::{Ack, AttendancePayload, EmployeeRecord, HrApi, RemoteError};
use crate::session::Session;
use crate::workflows::attendance::{
    CameraArbiter, CameraDevice, Clock, CodeDecoder, Coordinates, DecodeError, DeviceError,
    Direction, EmployeeId, EngineError, FaceDescriptor, FaceEngine, FixedLocation, Frame,
    LocationError, LocationSensor, PipelineDeps, ReferenceCache, ShiftDefinition, ShiftId,
};

pub(super) const PHOTO: &[u8] = b"photo-ayu";
pub(super) const PHOTO_WITHOUT_FACE: &[u8] = b"photo-blank";
pub(super) const FACE_AYU: &[u8] = b"face-ayu";
pub(super) const FACE_STRANGER: &[u8] = b"face-stranger";
pub(super) const NO_FACE: &[u8] = b"no-face";
pub(super) const CODE_EMP_9: &[u8] = b"qr-emp-9";
pub(super) const BLURRY: &[u8] = b"blurry";

pub(super) fn session() -> Session {
    Session::new("7", "42", "Ayu").expect("valid session")
}

pub(super) fn office_shift() -> ShiftDefinition {
    ShiftDefinition {
        id: ShiftId("1".to_string()),
        name: "Office".to_string(),
        start_time: Some("08:00".to_string()),
        end_time: Some("17:00".to_string()),
    }
}

pub(super) fn mounted_at() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .expect("valid date")
        .and_hms_opt(8, 5, 30)
        .expect("valid time")
}

pub(super) fn kiosk_location() -> Coordinates {
    Coordinates {
        latitude: -6.2,
        longitude: 106.8,
    }
}

/// Canned reply for one attendance write.
#[derive(Debug, Clone)]
pub(super) enum Reply {
    Ok(Value),
    Status(u16, Value),
    Transport,
}

#[derive(Default)]
pub(super) struct ScriptedApi {
    photo: Mutex<Option<Vec<u8>>>,
    employee_missing: Mutex<bool>,
    shifts: Mutex<Option<Vec<ShiftDefinition>>>,
    replies: Mutex<HashMap<Direction, VecDeque<Reply>>>,
    writes: Mutex<Vec<(Direction, AttendancePayload)>>,
    photo_fetches: AtomicUsize,
}

impl ScriptedApi {
    pub(super) fn new() -> Self {
        let api = Self::default();
        api.set_photo(PHOTO);
        api.set_shifts(vec![office_shift()]);
        api
    }

    pub(super) fn set_photo(&self, photo: &[u8]) {
        *self.photo.lock().expect("photo mutex poisoned") = Some(photo.to_vec());
    }

    pub(super) fn fail_employee_lookup(&self) {
        *self.employee_missing.lock().expect("employee mutex poisoned") = true;
    }

    pub(super) fn set_shifts(&self, shifts: Vec<ShiftDefinition>) {
        *self.shifts.lock().expect("shifts mutex poisoned") = Some(shifts);
    }

    pub(super) fn fail_shifts(&self) {
        *self.shifts.lock().expect("shifts mutex poisoned") = None;
    }

    pub(super) fn reply(&self, direction: Direction, reply: Reply) {
        self.replies
            .lock()
            .expect("replies mutex poisoned")
            .entry(direction)
            .or_default()
            .push_back(reply);
    }

    pub(super) fn writes(&self) -> Vec<(Direction, AttendancePayload)> {
        self.writes.lock().expect("writes mutex poisoned").clone()
    }

    pub(super) fn photo_fetches(&self) -> usize {
        self.photo_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HrApi for ScriptedApi {
    async fn fetch_employee(&self, id: &EmployeeId) -> Result<EmployeeRecord, RemoteError> {
        if *self.employee_missing.lock().expect("employee mutex poisoned") {
            return Err(RemoteError::Transport("connection refused".to_string()));
        }
        Ok(EmployeeRecord {
            id: id.0.clone(),
            name: "Ayu".to_string(),
            photo_url: Some(format!("/storage/photos/{}.jpg", id.0)),
        })
    }

    async fn fetch_photo(&self, _url: &str) -> Result<Vec<u8>, RemoteError> {
        self.photo_fetches.fetch_add(1, Ordering::SeqCst);
        self.photo
            .lock()
            .expect("photo mutex poisoned")
            .clone()
            .ok_or_else(|| RemoteError::Status {
                status: 404,
                body: None,
            })
    }

    async fn list_active_shifts(
        &self,
        _company_id: &str,
    ) -> Result<Vec<ShiftDefinition>, RemoteError> {
        self.shifts
            .lock()
            .expect("shifts mutex poisoned")
            .clone()
            .ok_or_else(|| RemoteError::Status {
                status: 503,
                body: None,
            })
    }

    async fn record_attendance(
        &self,
        direction: Direction,
        payload: &AttendancePayload,
    ) -> Result<Ack, RemoteError> {
        self.writes
            .lock()
            .expect("writes mutex poisoned")
            .push((direction, payload.clone()));

        let reply = self
            .replies
            .lock()
            .expect("replies mutex poisoned")
            .get_mut(&direction)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Reply::Ok(json!({ "message": "Saved" })));

        match reply {
            Reply::Ok(body) => serde_json::from_value(body)
                .map_err(|err| RemoteError::Decode(err.to_string())),
            Reply::Status(status, body) => Err(RemoteError::Status {
                status,
                body: Some(body),
            }),
            Reply::Transport => Err(RemoteError::Transport("timed out".to_string())),
        }
    }
}

/// Camera that replays queued frames and counts opens and closes.
#[derive(Default)]
pub(super) struct FakeCamera {
    open_error: Mutex<Option<DeviceError>>,
    frames: Mutex<VecDeque<Result<Vec<u8>, DeviceError>>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeCamera {
    pub(super) fn deny(&self) {
        *self.open_error.lock().expect("camera mutex poisoned") =
            Some(DeviceError::PermissionDenied);
    }

    pub(super) fn queue(&self, frame: &[u8]) {
        self.frames
            .lock()
            .expect("camera mutex poisoned")
            .push_back(Ok(frame.to_vec()));
    }

    pub(super) fn queue_error(&self, err: DeviceError) {
        self.frames
            .lock()
            .expect("camera mutex poisoned")
            .push_back(Err(err));
    }

    pub(super) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(super) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Every open has been matched by a close.
    pub(super) fn is_released(&self) -> bool {
        self.opens() == self.closes()
    }
}

#[async_trait]
impl CameraDevice for FakeCamera {
    async fn open(&self) -> Result<(), DeviceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.open_error.lock().expect("camera mutex poisoned").clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn capture(&self) -> Result<Frame, DeviceError> {
        let queued = self.frames.lock().expect("camera mutex poisoned").pop_front();
        match queued {
            Some(result) => result.map(Frame::new),
            None => Ok(Frame::new(BLURRY.to_vec())),
        }
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Maps known images to descriptors; anything else has no face.
pub(super) struct ScriptedFaceEngine;

#[async_trait]
impl FaceEngine for ScriptedFaceEngine {
    async fn describe_single_face(
        &self,
        image: &[u8],
    ) -> Result<Option<FaceDescriptor>, EngineError> {
        let values = match image {
            PHOTO => vec![0.0, 0.0, 0.0],
            FACE_AYU => vec![0.1, 0.0, 0.0],
            FACE_STRANGER => vec![0.9, 0.3, 0.0],
            _ => return Ok(None),
        };
        FaceDescriptor::new(values)
            .map(Some)
            .map_err(|err| EngineError::InvalidImage(err.to_string()))
    }
}

pub(super) struct ScriptedDecoder;

#[async_trait]
impl CodeDecoder for ScriptedDecoder {
    async fn decode(&self, image: &[u8]) -> Result<Option<String>, DecodeError> {
        match image {
            CODE_EMP_9 => Ok(Some(" EMP-9 ".to_string())),
            NO_FACE => Err(DecodeError::InvalidImage("truncated jpeg".to_string())),
            _ => Ok(None),
        }
    }
}

pub(super) struct DeniedSensor;

#[async_trait]
impl LocationSensor for DeniedSensor {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        Err(LocationError::PermissionDenied)
    }
}

pub(super) struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

pub(super) struct Harness {
    pub api: Arc<ScriptedApi>,
    pub camera: Arc<FakeCamera>,
    pub deps: PipelineDeps,
}

pub(super) fn harness() -> Harness {
    harness_with_sensor(Arc::new(FixedLocation::new(Some(kiosk_location()))))
}

pub(super) fn harness_with_sensor(sensor: Arc<dyn LocationSensor>) -> Harness {
    let api = Arc::new(ScriptedApi::new());
    let camera = Arc::new(FakeCamera::default());
    let deps = PipelineDeps {
        api: api.clone(),
        camera: CameraArbiter::new(camera.clone()),
        face_engine: Arc::new(ScriptedFaceEngine),
        decoder: Arc::new(ScriptedDecoder),
        location: sensor,
        clock: Arc::new(FixedClock(mounted_at())),
        references: ReferenceCache::new(),
        config: PipelineConfig {
            scan_interval: Duration::ZERO,
            ..PipelineConfig::default()
        },
    };
    Harness { api, camera, deps }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{VerifyError, VerifyResult};
use crate::gallery::write_atomic;
use crate::geo::{Coordinates, GeoVerifier, Geofence};

/// One student's presence in one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceFact {
    pub session_id: String,
    pub student_id: String,
    pub speech_ok: bool,
    pub face_ok: bool,
    pub geo_ok: bool,
    pub marked_at: DateTime<Utc>,
}

/// Durable attendance log, unique on `(session_id, student_id)`.
pub trait AttendanceLedger: Send + Sync {
    fn record(&self, fact: AttendanceFact) -> VerifyResult<()>;
    fn all(&self) -> VerifyResult<Vec<AttendanceFact>>;

    /// Newest first.
    fn by_session(&self, session_id: &str) -> VerifyResult<Vec<AttendanceFact>> {
        Ok(newest_first(
            self.all()?
                .into_iter()
                .filter(|f| f.session_id == session_id)
                .collect(),
        ))
    }

    /// Newest first.
    fn by_student(&self, student_id: &str) -> VerifyResult<Vec<AttendanceFact>> {
        Ok(newest_first(
            self.all()?
                .into_iter()
                .filter(|f| f.student_id == student_id)
                .collect(),
        ))
    }
}

fn newest_first(mut facts: Vec<AttendanceFact>) -> Vec<AttendanceFact> {
    facts.reverse();
    facts
}

fn ensure_unique(facts: &[AttendanceFact], fact: &AttendanceFact) -> VerifyResult<()> {
    let taken = facts
        .iter()
        .any(|f| f.session_id == fact.session_id && f.student_id == fact.student_id);
    if taken {
        return Err(VerifyError::DuplicateAttendance {
            session_id: fact.session_id.clone(),
            student_id: fact.student_id.clone(),
        });
    }
    Ok(())
}

#[derive(Default)]
pub struct MemoryLedger {
    facts: Mutex<Vec<AttendanceFact>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttendanceLedger for MemoryLedger {
    fn record(&self, fact: AttendanceFact) -> VerifyResult<()> {
        let mut facts = self
            .facts
            .lock()
            .map_err(|_| VerifyError::storage("ledger lock poisoned"))?;
        ensure_unique(&facts, &fact)?;
        facts.push(fact);
        Ok(())
    }

    fn all(&self) -> VerifyResult<Vec<AttendanceFact>> {
        self.facts
            .lock()
            .map(|f| f.clone())
            .map_err(|_| VerifyError::storage("ledger lock poisoned"))
    }
}

/// Postcard-encoded ledger file, rewritten atomically on each record.
pub struct FileLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> VerifyResult<Vec<AttendanceFact>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read(&self.path)
            .map_err(|e| VerifyError::storage(format!("reading {}: {e}", self.path.display())))?;
        postcard::from_bytes(&data)
            .map_err(|e| VerifyError::storage(format!("decoding {}: {e}", self.path.display())))
    }
}

impl AttendanceLedger for FileLedger {
    fn record(&self, fact: AttendanceFact) -> VerifyResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| VerifyError::storage("ledger lock poisoned"))?;
        let mut facts = self.read()?;
        ensure_unique(&facts, &fact)?;
        facts.push(fact);
        let data = postcard::to_allocvec(&facts).map_err(VerifyError::storage)?;
        write_atomic(&self.path, &data)
            .map_err(|e| VerifyError::storage(format!("writing {}: {e}", self.path.display())))
    }

    fn all(&self) -> VerifyResult<Vec<AttendanceFact>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| VerifyError::storage("ledger lock poisoned"))?;
        self.read()
    }
}

/// What a student submits when marking attendance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkRequest {
    pub session_id: String,
    pub student_id: String,
    pub speech_ok: bool,
    pub face_ok: bool,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub client_ip: Option<String>,
}

/// Check the session's fence, then record the fact.
///
/// Sessions without a fence accept any position; with one, the student's
/// coordinates are required and must fall inside it.
pub fn mark_attendance(
    ledger: &dyn AttendanceLedger,
    geo: &GeoVerifier,
    fence: Option<&Geofence>,
    request: &MarkRequest,
) -> VerifyResult<AttendanceFact> {
    if request.session_id.trim().is_empty() {
        return Err(VerifyError::MissingField("session_id"));
    }
    if request.student_id.trim().is_empty() {
        return Err(VerifyError::MissingField("student_id"));
    }

    let student = match (request.lat, request.lng) {
        (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)?),
        _ => None,
    };
    geo.check(fence, student, request.client_ip.as_deref())?;

    let fact = AttendanceFact {
        session_id: request.session_id.clone(),
        student_id: request.student_id.clone(),
        speech_ok: request.speech_ok,
        face_ok: request.face_ok,
        geo_ok: true,
        marked_at: Utc::now(),
    };
    ledger.record(fact.clone())?;
    log::info!(
        "attendance marked: session {} student {}",
        fact.session_id,
        fact.student_id
    );
    Ok(fact)
}

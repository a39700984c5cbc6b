//! Inbound payload schemas.
//!
//! Every subscribed topic has a strict schema: required fields must be
//! present with the right type, optional fields are named, and unknown fields
//! are ignored. Where the backend uses two spellings for one field (`id` /
//! `student_id`, `title` / `name`) both are accepted and normalized here, so
//! nothing downstream sees the raw shapes.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ParseError;

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Json { line, column } => {
                write!(f, "malformed payload at line {} column {}", line, column)
            }
            ParseError::InvalidPhase(p) => write!(f, "homework phase {} out of range", p),
            ParseError::NotUtf8 => f.write_str("payload is not UTF-8"),
        }
    }
}

/// One card on the roster of students expected today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// `None` when the backend sent a student without an id; such a card
    /// can be shown but not selected.
    pub student_id: Option<String>,
    pub name: Option<String>,
    pub course_name: Option<String>,
    pub grade_name: Option<String>,
    pub class_time: Option<String>,
}

#[derive(Deserialize)]
struct RawStudent {
    student_id: Option<String>,
    id: Option<String>,
    name: Option<String>,
    student_name: Option<String>,
    course_name: Option<String>,
    grade_name: Option<String>,
    class_time: Option<String>,
}

impl From<RawStudent> for RosterEntry {
    fn from(raw: RawStudent) -> Self {
        Self {
            student_id: raw.student_id.or(raw.id).filter(|id| !id.is_empty()),
            name: raw.name.or(raw.student_name),
            course_name: raw.course_name,
            grade_name: raw.grade_name,
            class_time: raw.class_time,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRoster {
    List(Vec<RawStudent>),
    Wrapped {
        students: Option<Vec<RawStudent>>,
        items: Option<Vec<RawStudent>>,
        data: Option<Vec<RawStudent>>,
    },
}

/// Parses a `students_today` payload: a bare array, or an object with the
/// array under `students`, `items` or `data` (first one present wins).
pub fn parse_roster(payload: &[u8]) -> Result<Vec<RosterEntry>, ParseError> {
    let raw: RawRoster = serde_json::from_slice(payload)?;
    let students = match raw {
        RawRoster::List(list) => list,
        RawRoster::Wrapped {
            students,
            items,
            data,
        } => students.or(items).or(data).unwrap_or_default(),
    };
    Ok(students.into_iter().map(RosterEntry::from).collect())
}

/// Lifecycle stage of a homework item. Only the backend moves an item
/// between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(try_from = "u8")]
pub enum Phase {
    Waiting = 1,
    Performing = 2,
    SubmittedPending = 3,
    ConfirmPending = 4,
}

impl TryFrom<u8> for Phase {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Phase::Waiting),
            2 => Ok(Phase::Performing),
            3 => Ok(Phase::SubmittedPending),
            4 => Ok(Phase::ConfirmPending),
            other => Err(ParseError::InvalidPhase(other)),
        }
    }
}

/// One homework card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeworkItem {
    pub item_id: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub phase: Phase,
    /// Seconds already spent performing, as of the snapshot.
    pub accumulated_seconds: u64,
    /// Presentation hint, passed through untouched.
    pub color: Option<Value>,
}

#[derive(Deserialize)]
struct RawItem {
    item_id: String,
    title: Option<String>,
    name: Option<String>,
    phase: Phase,
    body: Option<String>,
    accumulated: Option<u64>,
    color: Option<Value>,
}

#[derive(Deserialize)]
struct RawSnapshot {
    items: Vec<RawItem>,
}

/// Parses a `homeworks` snapshot.
pub fn parse_homeworks(payload: &[u8]) -> Result<Vec<HomeworkItem>, ParseError> {
    let raw: RawSnapshot = serde_json::from_slice(payload)?;
    Ok(raw
        .items
        .into_iter()
        .map(|item| HomeworkItem {
            item_id: item.item_id,
            title: item.title.or(item.name),
            body: item.body.filter(|b| !b.is_empty()),
            phase: item.phase,
            accumulated_seconds: item.accumulated.unwrap_or(0),
            color: item.color,
        })
        .collect())
}

/// Details of the bound student, shown on the info page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StudentInfo {
    pub name: Option<String>,
    pub school: Option<String>,
    pub grade: Option<i32>,
    pub education_level: Option<i32>,
    pub start_hour: Option<u8>,
    pub start_minute: Option<u8>,
    pub weekday_kr: Option<String>,
}

#[derive(Deserialize)]
struct InfoEnvelope {
    info: StudentInfo,
}

pub fn parse_student_info(payload: &[u8]) -> Result<StudentInfo, ParseError> {
    let envelope: InfoEnvelope = serde_json::from_slice(payload)?;
    Ok(envelope.info)
}

/// Firmware update status. `raw` is always the payload text; the typed
/// fields are filled when the payload is the usual JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateStatus {
    pub raw: String,
    pub available: Option<bool>,
    pub version: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
struct RawUpdate {
    available: Option<bool>,
    version: Option<String>,
    notes: Option<String>,
}

pub fn parse_update(payload: &[u8]) -> Result<UpdateStatus, ParseError> {
    let raw = core::str::from_utf8(payload).map_err(|_| ParseError::NotUtf8)?;
    let mut status = UpdateStatus {
        raw: String::from(raw),
        ..Default::default()
    };
    if let Ok(fields) = serde_json::from_str::<RawUpdate>(raw) {
        status.available = fields.available;
        status.version = fields.version;
        status.notes = fields.notes;
    }
    Ok(status)
}

/// Backend answer to a device-level command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceAck {
    pub ok: bool,
    pub action: String,
    pub error: Option<String>,
    pub student_id: Option<String>,
    pub count: Option<u32>,
}

pub fn parse_device_ack(payload: &[u8]) -> Result<DeviceAck, ParseError> {
    Ok(serde_json::from_slice(payload)?)
}

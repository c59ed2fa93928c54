// src/worklog_data.rs

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

// --- Policy Constants ---

/// Hours credited when a user submitted nothing for the day.
pub const FULL_DAY_LEAVE_HOURS: Decimal = dec!(7.5);
/// Hours credited by the synthetic leave row that offsets a half-day entry.
pub const HALF_DAY_LEAVE_HOURS: Decimal = dec!(3.75);

pub const DEFAULT_UNIT_TYPE: &str = "general";
pub const AUTO_LEAVE_DETAILS: &str = "Auto-assigned leave - no worklog submitted";
pub const HALF_DAY_LEAVE_DETAILS: &str = "Auto-assigned partial leave for Half Day";

/// Teams whose members participate in the nightly reconciliation run.
pub const ELIGIBLE_TEAMS: [&str; 8] = [
    "Editorial_Maths",
    "Editorial_Science",
    "Editorial_SST",
    "Editorial_English",
    "DTP_Raj",
    "CSMA_Maths",
    "CSMA_Science",
    "CSMA_Intern",
];

// --- Core Data Structures ---

/// Lowercased display name. Directory rows, drafts and durable rows are
/// joined on this key, so lookups must lowercase before comparing.
pub type UserKey = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Employee,
    Spoc,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl User {
    pub fn new(email: &str, name: &str, team: &str, role: Role) -> Self {
        Self {
            email: email.to_string(),
            name: name.to_string(),
            team: Some(team.to_string()),
            role,
        }
    }

    pub fn user_key(&self) -> UserKey {
        self.name.to_lowercase()
    }
}

/// How the day was worked. `Half Day` is the only mode the engine treats
/// specially; free text that matches none of the known literals is kept
/// verbatim in `Other` and carries no special semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkMode {
    FullDay,
    HalfDay,
    Wfh,
    Leave,
    Other(String),
}

impl WorkMode {
    pub fn as_str(&self) -> &str {
        match self {
            WorkMode::FullDay => "Full Day",
            WorkMode::HalfDay => "Half Day",
            WorkMode::Wfh => "WFH",
            WorkMode::Leave => "Leave",
            WorkMode::Other(text) => text,
        }
    }
}

impl From<String> for WorkMode {
    fn from(value: String) -> Self {
        match value.trim() {
            "Full Day" => WorkMode::FullDay,
            "Half Day" => WorkMode::HalfDay,
            "WFH" => WorkMode::Wfh,
            "Leave" => WorkMode::Leave,
            _ => WorkMode::Other(value),
        }
    }
}

impl From<WorkMode> for String {
    fn from(mode: WorkMode) -> Self {
        match mode {
            WorkMode::Other(text) => text,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for WorkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approval-workflow state of a durable entry. The reconciliation engine
/// only ever writes `Pending`; the remaining states belong to the review
/// flow that mutates entries after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditStatus {
    Pending,
    Approved,
    Rejected,
    #[serde(rename = "Re-Pending")]
    RePending,
    #[serde(rename = "Re-Approved")]
    ReApproved,
    #[serde(rename = "Re-Rejected")]
    ReRejected,
}

/// A user's uncommitted same-day work record. Optional fields mirror the
/// loosely validated intake forms; the engine fills the gaps when it
/// promotes a draft to a durable row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftEntry {
    #[serde(default)]
    pub id: i64,
    pub date: NaiveDate,
    pub work_mode: WorkMode,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub book_element: Option<String>,
    #[serde(default)]
    pub chapter_number: Option<String>,
    #[serde(default)]
    pub hours_spent: Option<Decimal>,
    #[serde(default)]
    pub number_of_units: Option<i64>,
    #[serde(default)]
    pub unit_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_on: Option<NaiveDate>,
    #[serde(default)]
    pub details: Option<String>,
    pub name: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}

impl DraftEntry {
    pub fn new(name: &str, date: NaiveDate, work_mode: WorkMode) -> Self {
        Self {
            id: 0,
            date,
            work_mode,
            project_name: None,
            task_name: None,
            book_element: None,
            chapter_number: None,
            hours_spent: None,
            number_of_units: None,
            unit_type: None,
            status: None,
            due_on: None,
            details: None,
            name: name.to_string(),
            team: None,
            created_at: None,
        }
    }

    pub fn hours(mut self, hours: Decimal) -> Self {
        self.hours_spent = Some(hours);
        self
    }
    pub fn units(mut self, count: i64, unit_type: &str) -> Self {
        self.number_of_units = Some(count);
        self.unit_type = Some(unit_type.to_string());
        self
    }
    pub fn project(mut self, project: &str) -> Self {
        self.project_name = Some(project.to_string());
        self
    }
    pub fn task(mut self, task: &str) -> Self {
        self.task_name = Some(task.to_string());
        self
    }
    pub fn status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }
    pub fn due(mut self, due_on: NaiveDate) -> Self {
        self.due_on = Some(due_on);
        self
    }
    pub fn details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }

    pub fn user_key(&self) -> UserKey {
        self.name.to_lowercase()
    }
}

/// A finalized worklog row in the audit ledger. Created by explicit user
/// submission, by admin insertion, or by the reconciliation engine; never
/// deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableEntry {
    pub date: NaiveDate,
    pub work_mode: WorkMode,
    pub project_name: String,
    pub task_name: String,
    pub book_element: String,
    pub chapter_number: String,
    pub hours_spent: Decimal,
    pub number_of_units: i64,
    pub unit_type: String,
    pub status: String,
    pub due_on: NaiveDate,
    pub details: String,
    pub audit_status: AuditStatus,
    pub name: String,
    pub team: String,
    pub created_at: NaiveDateTime,
    pub submitted_at: NaiveDateTime,
    /// Stable dedup key for engine-written rows; a second insert with the
    /// same (user key, date, key) triple is refused by the durable store.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl DurableEntry {
    /// Promote a draft to a durable row for `target_date`. Missing numeric
    /// fields become zero, the unit type falls back to `"general"`, a
    /// missing due date falls back to the target date, and identity fields
    /// always come from the directory user rather than the draft.
    pub fn from_draft(
        draft: &DraftEntry,
        user: &User,
        target_date: NaiveDate,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            date: target_date,
            work_mode: draft.work_mode.clone(),
            project_name: draft.project_name.clone().unwrap_or_default(),
            task_name: draft.task_name.clone().unwrap_or_default(),
            book_element: draft.book_element.clone().unwrap_or_default(),
            chapter_number: draft.chapter_number.clone().unwrap_or_default(),
            hours_spent: draft.hours_spent.unwrap_or(Decimal::ZERO),
            number_of_units: draft.number_of_units.unwrap_or(0),
            unit_type: draft
                .unit_type
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_UNIT_TYPE.to_string()),
            status: draft.status.clone().unwrap_or_default(),
            due_on: draft.due_on.unwrap_or(target_date),
            details: draft.details.clone().unwrap_or_default(),
            audit_status: AuditStatus::Pending,
            name: user.name.clone(),
            team: user.team.clone().unwrap_or_default(),
            created_at: draft.created_at.unwrap_or(now),
            submitted_at: now,
            idempotency_key: Some(draft_key(draft.id)),
        }
    }

    /// Build an engine-generated leave row (full-day or half-day offset).
    pub fn auto_leave(
        user: &User,
        target_date: NaiveDate,
        hours: Decimal,
        details: &str,
        idempotency_key: String,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            date: target_date,
            work_mode: WorkMode::Leave,
            project_name: String::new(),
            task_name: String::new(),
            book_element: String::new(),
            chapter_number: String::new(),
            hours_spent: hours,
            number_of_units: 0,
            unit_type: DEFAULT_UNIT_TYPE.to_string(),
            status: String::new(),
            due_on: target_date,
            details: details.to_string(),
            audit_status: AuditStatus::Pending,
            name: user.name.clone(),
            team: user.team.clone().unwrap_or_default(),
            created_at: now,
            submitted_at: now,
            idempotency_key: Some(idempotency_key),
        }
    }

    pub fn user_key(&self) -> UserKey {
        self.name.to_lowercase()
    }
}

// --- Idempotency Keys ---

pub fn draft_key(draft_id: i64) -> String {
    format!("draft:{draft_id}")
}

pub fn auto_leave_key(user_key: &str, date: NaiveDate) -> String {
    format!("auto-leave:{user_key}:{date}")
}

pub fn half_day_offset_key(user_key: &str, date: NaiveDate) -> String {
    format!("half-day-offset:{user_key}:{date}")
}

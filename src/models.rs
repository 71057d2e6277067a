// Records, per-user session state and error types
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// One extracted table row, keyed by schema field name.
pub type Record = HashMap<&'static str, String>;

// Pull a field out of a record, absent fields read as empty text
fn field(record: &Record, name: &str) -> String {
    record.get(name).cloned().unwrap_or_default()
}

// One class from the desktop grade list, average overwritten from the mobile view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeRecord {
    pub class: String,
    pub teacher: String,
    pub semester: String,
    pub period: String,
    pub room: String,
    pub average: String,
    pub absences: String,
    pub tardies: String,
}

impl GradeRecord {
    pub fn from_record(record: &Record) -> Self {
        Self {
            class: field(record, "class"),
            teacher: field(record, "teacher"),
            semester: field(record, "semester"),
            period: field(record, "period"),
            room: field(record, "room"),
            average: field(record, "average"),
            absences: field(record, "absences"),
            tardies: field(record, "tardies"),
        }
    }
}

// One row of the mobile summary grid, only used for its average
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MobileGrade {
    pub class: String,
    pub teacher: String,
    pub average: String,
}

impl MobileGrade {
    pub fn from_record(record: &Record) -> Self {
        Self {
            class: field(record, "class"),
            teacher: field(record, "teacher"),
            average: field(record, "average"),
        }
    }
}

// One assignment on a class page
// The checkbox, altAssignmentName and longScore columns are never carried
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub assignment_name: String,
    pub date_assigned: String,
    pub date_due: String,
    pub category_desc: String,
    pub category_weight: String,
    pub percentage: String,
    pub fraction: String,
    pub total_score: String,
}

impl AssignmentRecord {
    pub fn from_record(record: &Record) -> Self {
        Self {
            assignment_name: field(record, "assignmentName"),
            date_assigned: field(record, "dateAssigned"),
            date_due: field(record, "dateDue"),
            category_desc: field(record, "categoryDesc"),
            category_weight: field(record, "categoryWeight"),
            percentage: field(record, "percentage"),
            fraction: field(record, "fraction"),
            total_score: field(record, "totalScore"),
        }
    }
}

// Portal login
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// Never print the password, not even in debug builds
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// Password held only while the pipeline runs
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

// Timing metadata for one login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTiming {
    pub started_at: DateTime<Local>,
    pub login_elapsed_secs: Option<f64>,
}

// In-memory state of one user, mutated only by the portal pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    pub username: String,
    #[serde(skip)]
    pub password: Option<Password>,
    pub logged_in: bool,
    pub slot_index: usize,
    pub grades: Vec<GradeRecord>,
    pub assignments: Vec<Vec<AssignmentRecord>>,
    pub grades_ready: bool,
    pub assignments_ready: bool,
    pub timing: SessionTiming,
}

impl UserSession {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            username: credentials.username,
            password: Some(Password(credentials.password)),
            logged_in: false,
            slot_index: 0,
            grades: Vec::new(),
            assignments: Vec::new(),
            grades_ready: false,
            assignments_ready: false,
            timing: SessionTiming {
                started_at: Local::now(),
                login_elapsed_secs: None,
            },
        }
    }

    // Drop the password once the portal no longer needs it
    pub fn forget_password(&mut self) {
        self.password = None;
    }
}

// A desktop class the mobile grid had no average for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionMismatch {
    pub class: String,
    pub row: usize,
}

// Grades/assignments polling result
#[derive(Debug, Clone, PartialEq)]
pub enum Availability<T> {
    Ready(T),
    NotReady,
}

impl<T> Availability<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Availability::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Availability::Ready(value) => Some(value),
            Availability::NotReady => None,
        }
    }
}

// Portal scraping errors
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("timed out waiting for {step}")]
    NavigationTimeout { step: &'static str },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("invalid selector: {0}")]
    Selector(String),

    #[error("login failed: {reason}")]
    AuthFailure { reason: String },

    #[error("user is not logged in")]
    NotLoggedIn,
}

impl ScrapeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScrapeError::NavigationTimeout { .. })
    }
}

// Caller-facing errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Please enter a username and password")]
    MissingCredentials,

    // Same message whatever the underlying cause, the cause goes to the log
    #[error("Invalid username and/or password")]
    LoginRejected,

    #[error("unknown session")]
    UnknownSession,

    #[error("scraping error: {0}")]
    Scrape(#[from] ScrapeError),
}

// Core domain types shared across all Studia crates.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A study group: a named collective with a creator, members, and a
/// pending-request queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub subjects: Vec<String>,
    pub privacy: GroupPrivacy,
    pub creator_id: Uuid,
    /// Accepted members. The creator is implicit and never appears here.
    #[serde(default)]
    pub members: Vec<Uuid>,
    /// Users waiting for the creator to accept or decline.
    #[serde(default)]
    pub pending_requests: Vec<Uuid>,
    pub city: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    /// True if `user_id` is the creator or an accepted member.
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.creator_id == user_id || self.members.contains(&user_id)
    }
}

/// Group visibility in browse/search listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupPrivacy {
    Public,
    Private,
}

impl GroupPrivacy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

/// A scheduled study meeting occupying a time range within a group.
///
/// Times are civil local time as entered by the members: a calendar date plus
/// a wall-clock time, with no timezone recorded (see `civil`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudySession {
    pub id: Uuid,
    pub group_id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_date: NaiveDate,
    pub end_time: NaiveTime,
    /// Users who have accepted the session.
    #[serde(default)]
    pub accepted_by: Vec<Uuid>,
}

impl StudySession {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.start_date.and_time(self.start_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.end_date.and_time(self.end_time)
    }
}

/// A chat message in a group's durable log.
///
/// The payload discriminates text from file messages; a file message still
/// renders as text (see [`ChatMessage::display_text`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender_id: Uuid,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: MessagePayload,
}

impl ChatMessage {
    pub fn display_text(&self) -> String {
        match &self.payload {
            MessagePayload::Text { body } => body.clone(),
            MessagePayload::File { name, .. } => format!("File: {name}"),
        }
    }
}

/// Message content: plain text, or a reference to an uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    Text { body: String },
    File { url: String, name: String },
}

/// A shared to-do item on a group's task board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: Uuid,
    pub group_id: Uuid,
    pub creator_id: Uuid,
    pub assigned_to: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Taken,
    Completed,
}

impl TaskStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Taken => "taken",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "taken" => Some(Self::Taken),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A quiz authored inside a group, with per-user results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quiz {
    pub id: Uuid,
    pub group_id: Uuid,
    pub creator_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub questions: Vec<QuizQuestion>,
    #[serde(default)]
    pub results: Vec<QuizResult>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizQuestion {
    pub id: Uuid,
    pub text: String,
    pub options: Vec<QuizOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizOption {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizResult {
    pub user_id: Uuid,
    pub score: f64,
    pub submitted_at: DateTime<Utc>,
}

/// A key/value row from the static subject and city reference tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupEntry {
    pub key: String,
    pub value: String,
}

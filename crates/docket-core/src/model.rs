use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::store::Document;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(Priority::Low),
            "m" | "medium" => Ok(Priority::Medium),
            "h" | "high" => Ok(Priority::High),
            other => Err(anyhow!("invalid priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: Uuid,

    pub name: String,

    #[serde(default)]
    pub icon: String,

    #[serde(default)]
    pub color: String,

    #[serde(default)]
    pub order: i64,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Weekly re-activation schedule stored inline on a task document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    #[serde(default)]
    pub is_recurring: bool,

    /// 0 = Sunday .. 6 = Saturday.
    #[serde(default)]
    pub recurring_day: Option<u8>,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_renewed: Option<DateTime<Utc>>,
}

impl Recurrence {
    pub fn weekly(day: u8) -> Self {
        Self {
            is_recurring: true,
            recurring_day: Some(day),
            last_renewed: None,
        }
    }

    /// The schedule day, if this is a well-formed recurring task.
    pub fn day(&self) -> Option<u8> {
        if !self.is_recurring {
            return None;
        }
        self.recurring_day.filter(|day| *day <= 6)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,

    pub title: String,

    #[serde(default)]
    pub description: String,

    pub category_id: Uuid,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub due_date: Option<NaiveDate>,

    #[serde(default)]
    pub completed: bool,

    #[serde(flatten)]
    pub recurrence: Recurrence,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.completed && self.due_date.map(|due| due < today).unwrap_or(false)
    }
}

/// Which tasks the list view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Pending,
    Completed,
}

impl StatusFilter {
    pub fn admits(self, task: &Task) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Pending => !task.completed,
            StatusFilter::Completed => task.completed,
        }
    }
}

impl std::str::FromStr for StatusFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(StatusFilter::All),
            "pending" => Ok(StatusFilter::Pending),
            "completed" | "done" => Ok(StatusFilter::Completed),
            other => Err(anyhow!("invalid status filter: {other}")),
        }
    }
}

/// Decodes a store document into a model record; the document id becomes the `id` field.
pub fn from_document<T: DeserializeOwned>(doc: &Document) -> anyhow::Result<T> {
    let mut fields = doc.fields.clone();
    fields.insert("id".to_string(), Value::String(doc.id.to_string()));
    serde_json::from_value(Value::Object(fields))
        .with_context(|| format!("malformed document {}", doc.id))
}

/// Encodes a model record into document fields, leaving the id to the store.
pub fn to_fields<T: Serialize>(record: &T) -> anyhow::Result<Map<String, Value>> {
    match serde_json::to_value(record)? {
        Value::Object(mut fields) => {
            fields.remove("id");
            Ok(fields)
        }
        other => Err(anyhow!("expected an object, got {other}")),
    }
}

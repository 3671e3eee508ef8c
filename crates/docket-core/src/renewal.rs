use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::datetime::weekday_index;
use crate::model::{Recurrence, Task, from_document};
use crate::store::{Collection, DocumentStore, Query};

/// Minimum gap between two renewals of the same task.
pub const RENEWAL_INTERVAL_DAYS: i64 = 6;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub scanned: usize,
    pub renewed: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

/// True when today (in `tz`) is the task's day and it has not been renewed
/// within the last six days.
pub fn is_due(recurrence: &Recurrence, now: DateTime<Utc>, tz: Tz) -> bool {
    let Some(day) = recurrence.day() else {
        return false;
    };
    if weekday_index(now, tz) != day {
        return false;
    }
    match recurrence.last_renewed {
        None => true,
        Some(last) => now - last >= Duration::days(RENEWAL_INTERVAL_DAYS),
    }
}

pub fn renewal_fields(now: DateTime<Utc>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("completed".to_string(), Value::Bool(false));
    fields.insert(
        "lastRenewed".to_string(),
        Value::from(now.timestamp_millis()),
    );
    fields.insert("updatedAt".to_string(), Value::from(now.timestamp_millis()));
    fields
}

/// One catch-up pass over every recurring task. Individual write failures are
/// logged and reported; they do not stop the sweep.
#[tracing::instrument(skip(store, now, tz))]
pub fn sweep<S>(store: &mut S, now: DateTime<Utc>, tz: Tz) -> anyhow::Result<SweepReport>
where
    S: DocumentStore + ?Sized,
{
    let docs = store
        .query(&Query::all(Collection::Tasks).where_eq("isRecurring", true))
        .context("failed to load recurring tasks")?;

    let mut report = SweepReport {
        scanned: docs.len(),
        ..SweepReport::default()
    };

    for doc in &docs {
        let task: Task = match from_document(doc) {
            Ok(task) => task,
            Err(err) => {
                warn!(id = %doc.id, error = %err, "skipping malformed recurring task");
                continue;
            }
        };

        if task.recurrence.day().is_none() {
            warn!(id = %task.id, day = ?task.recurrence.recurring_day, "recurring task has no valid day");
            continue;
        }
        if !is_due(&task.recurrence, now, tz) {
            continue;
        }

        match store.update(Collection::Tasks, task.id, renewal_fields(now)) {
            Ok(()) => {
                debug!(id = %task.id, title = %task.title, "renewed recurring task");
                report.renewed.push(task.id);
            }
            Err(err) => {
                warn!(id = %task.id, error = %err, "failed to renew recurring task");
                report.failed.push(task.id);
            }
        }
    }

    info!(
        scanned = report.scanned,
        renewed = report.renewed.len(),
        failed = report.failed.len(),
        "renewal sweep finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn never_renewed_task_is_due_on_its_day() {
        // 2025-10-01 is a Wednesday.
        let wednesday = at(2025, 10, 1, 9);
        assert!(is_due(&Recurrence::weekly(3), wednesday, chrono_tz::UTC));
        assert!(!is_due(&Recurrence::weekly(4), wednesday, chrono_tz::UTC));
    }

    #[test]
    fn recent_renewal_blocks_same_day_reload() {
        let wednesday = at(2025, 10, 1, 9);
        let mut recurrence = Recurrence::weekly(3);
        recurrence.last_renewed = Some(at(2025, 10, 1, 8));
        assert!(!is_due(&recurrence, wednesday, chrono_tz::UTC));

        recurrence.last_renewed = Some(at(2025, 9, 24, 9));
        assert!(is_due(&recurrence, wednesday, chrono_tz::UTC));

        recurrence.last_renewed = Some(at(2025, 9, 25, 10));
        assert!(!is_due(&recurrence, wednesday, chrono_tz::UTC));
    }

    #[test]
    fn non_recurring_task_is_never_due() {
        let recurrence = Recurrence {
            is_recurring: false,
            recurring_day: Some(3),
            last_renewed: None,
        };
        assert!(!is_due(&recurrence, at(2025, 10, 1, 9), chrono_tz::UTC));
    }
}

use std::collections::HashMap;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::model::{Category, StatusFilter, Task, from_document};
use crate::store::{Collection, Document, SnapshotEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
}

impl Stats {
    pub fn of(tasks: &[Task]) -> Self {
        let total = tasks.len();
        let completed = tasks.iter().filter(|t| t.completed).count();
        Self {
            total,
            completed,
            pending: total - completed,
        }
    }
}

/// Views that need re-rendering after state changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dirty {
    pub categories: bool,
    pub tasks: bool,
    pub stats: bool,
}

impl Dirty {
    pub fn merge(&mut self, other: Dirty) {
        self.categories |= other.categories;
        self.tasks |= other.tasks;
        self.stats |= other.stats;
    }

    pub fn any(&self) -> bool {
        self.categories || self.tasks || self.stats
    }
}

/// What applying one stream event did to the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Replaced(Dirty),
    /// The stream reported an error; the mirror kept its last good value.
    Retained(String),
}

/// Local mirror of the two live collections plus their derived aggregates.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    categories: Vec<Category>,
    tasks: Vec<Task>,
    stats: Stats,
    per_category: HashMap<Uuid, usize>,
}

impl Reconciler {
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn task_count(&self, category: Uuid) -> usize {
        self.per_category.get(&category).copied().unwrap_or(0)
    }

    pub fn category(&self, id: Uuid) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Tasks in the active category (or all when none is selected) that pass `filter`.
    pub fn visible_tasks(&self, selected: Option<Uuid>, filter: StatusFilter) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| selected.is_none_or(|id| t.category_id == id))
            .filter(|t| filter.admits(t))
            .collect()
    }

    #[tracing::instrument(skip(self, event), fields(collection = %collection))]
    pub fn apply(&mut self, collection: Collection, event: SnapshotEvent) -> Applied {
        match event {
            SnapshotEvent::Snapshot(docs) => Applied::Replaced(match collection {
                Collection::Categories => self.replace_categories(&docs),
                Collection::Tasks => self.replace_tasks(&docs),
            }),
            SnapshotEvent::Error(message) => {
                error!(%message, "listener error; keeping last snapshot");
                Applied::Retained(message)
            }
        }
    }

    pub fn replace_categories(&mut self, docs: &[Document]) -> Dirty {
        self.categories = decode_all(docs);
        debug!(count = self.categories.len(), "categories updated");
        Dirty {
            categories: true,
            ..Dirty::default()
        }
    }

    pub fn replace_tasks(&mut self, docs: &[Document]) -> Dirty {
        self.tasks = decode_all(docs);
        self.recompute();
        debug!(
            count = self.tasks.len(),
            completed = self.stats.completed,
            "tasks updated"
        );
        Dirty {
            categories: true,
            tasks: true,
            stats: true,
        }
    }

    fn recompute(&mut self) {
        self.stats = Stats::of(&self.tasks);
        self.per_category.clear();
        for task in &self.tasks {
            *self.per_category.entry(task.category_id).or_insert(0) += 1;
        }
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match from_document(doc) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(id = %doc.id, error = %err, "skipping malformed document");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn doc(fields: Value) -> Document {
        let Value::Object(fields) = fields else {
            panic!("fixture must be an object");
        };
        Document {
            id: Uuid::new_v4(),
            fields,
        }
    }

    fn task_doc(category: Uuid, completed: bool) -> Document {
        doc(json!({
            "title": "t",
            "categoryId": category.to_string(),
            "completed": completed,
            "createdAt": 0,
        }))
    }

    #[test]
    fn pending_is_total_minus_completed_after_every_push() {
        let work = Uuid::new_v4();
        let home = Uuid::new_v4();
        let mut mirror = Reconciler::default();

        let pushes = [
            vec![],
            vec![task_doc(work, false)],
            vec![task_doc(work, true), task_doc(home, false), task_doc(home, true)],
            vec![task_doc(home, true)],
        ];
        for docs in pushes {
            mirror.apply(Collection::Tasks, SnapshotEvent::Snapshot(docs));
            let stats = mirror.stats();
            assert_eq!(stats.pending, stats.total - stats.completed);
        }
        assert_eq!(mirror.task_count(home), 1);
        assert_eq!(mirror.task_count(work), 0);
    }

    #[test]
    fn stream_error_keeps_last_known_good_mirror() {
        let work = Uuid::new_v4();
        let mut mirror = Reconciler::default();
        mirror.apply(
            Collection::Tasks,
            SnapshotEvent::Snapshot(vec![task_doc(work, false), task_doc(work, true)]),
        );

        let applied = mirror.apply(
            Collection::Tasks,
            SnapshotEvent::Error("network unreachable".to_string()),
        );
        assert_eq!(applied, Applied::Retained("network unreachable".to_string()));
        assert_eq!(mirror.tasks().len(), 2);
        assert_eq!(mirror.stats().completed, 1);
    }

    #[test]
    fn push_replaces_wholesale_and_skips_malformed_documents() {
        let mut mirror = Reconciler::default();
        mirror.apply(
            Collection::Categories,
            SnapshotEvent::Snapshot(vec![
                doc(json!({"name": "Work", "order": 0, "createdAt": 0})),
                doc(json!({"name": "Home", "order": 1, "createdAt": 0})),
            ]),
        );
        assert_eq!(mirror.categories().len(), 2);

        mirror.apply(
            Collection::Categories,
            SnapshotEvent::Snapshot(vec![
                doc(json!({"name": "Studies", "order": 0, "createdAt": 0})),
                doc(json!({"order": "not a category"})),
            ]),
        );
        let names: Vec<_> = mirror.categories().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Studies"]);
    }

    #[test]
    fn visible_tasks_respect_category_and_status() {
        let work = Uuid::new_v4();
        let home = Uuid::new_v4();
        let mut mirror = Reconciler::default();
        mirror.apply(
            Collection::Tasks,
            SnapshotEvent::Snapshot(vec![
                task_doc(work, false),
                task_doc(work, true),
                task_doc(home, false),
            ]),
        );

        assert_eq!(mirror.visible_tasks(None, StatusFilter::All).len(), 3);
        assert_eq!(mirror.visible_tasks(Some(work), StatusFilter::All).len(), 2);
        assert_eq!(
            mirror.visible_tasks(Some(work), StatusFilter::Pending).len(),
            1
        );
        assert_eq!(mirror.visible_tasks(None, StatusFilter::Completed).len(), 1);
    }
}

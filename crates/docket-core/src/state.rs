use chrono::NaiveDate;
use tracing::{error, info};
use uuid::Uuid;

use crate::model::{Category, Priority, StatusFilter, Task};
use crate::reconcile::{Applied, Dirty, Reconciler, Stats};
use crate::reorder::{DragView, ReorderController, reconciled};
use crate::store::{Collection, SnapshotEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Success,
    Error,
}

/// Transient, non-blocking notice shown after an operation or a sync problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub text: String,
}

/// A destructive action waiting for the user to confirm or cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingAction {
    #[default]
    None,
    ConfirmDeleteCategory(Uuid),
    ConfirmDeleteTask(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Title,
    Category,
    RecurringDay,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("category name is required")]
    EmptyName,
    #[error("task title is required")]
    EmptyTitle,
    #[error("select at least one category")]
    NoCategory,
    #[error("unknown category: {0}")]
    UnknownCategory(Uuid),
    #[error("recurring day must be between 0 and 6, got {0}")]
    RecurringDay(u8),
}

impl FormError {
    /// The input the message belongs next to.
    pub fn field(&self) -> Field {
        match self {
            FormError::EmptyName => Field::Name,
            FormError::EmptyTitle => Field::Title,
            FormError::NoCategory | FormError::UnknownCategory(_) => Field::Category,
            FormError::RecurringDay(_) => Field::RecurringDay,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryForm {
    pub editing: Option<Uuid>,
    pub name: String,
    pub icon: String,
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskForm {
    pub editing: Option<Uuid>,
    pub title: String,
    pub description: String,
    /// Creating with several categories makes one independent task per category.
    pub categories: Vec<Uuid>,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub recurring_day: Option<u8>,
}

impl CategoryForm {
    pub fn validate(&self) -> Result<(), FormError> {
        if self.name.trim().is_empty() {
            return Err(FormError::EmptyName);
        }
        Ok(())
    }
}

impl TaskForm {
    pub fn validate(&self, known: &Reconciler) -> Result<(), FormError> {
        if self.title.trim().is_empty() {
            return Err(FormError::EmptyTitle);
        }
        if self.categories.is_empty() {
            return Err(FormError::NoCategory);
        }
        if let Some(unknown) = self
            .categories
            .iter()
            .find(|id| known.category(**id).is_none())
        {
            return Err(FormError::UnknownCategory(*unknown));
        }
        if let Some(day) = self.recurring_day
            && day > 6
        {
            return Err(FormError::RecurringDay(day));
        }
        Ok(())
    }
}

/// Everything the presentation layer reads, owned in one place.
#[derive(Debug, Default)]
pub struct AppState {
    mirror: Reconciler,
    reorder: ReorderController,
    selected: Option<Uuid>,
    filter: StatusFilter,
    pending: PendingAction,
    status: Option<StatusMessage>,
    form_error: Option<FormError>,
    dirty: Dirty,
}

impl AppState {
    pub fn mirror(&self) -> &Reconciler {
        &self.mirror
    }

    pub fn reorder(&self) -> &ReorderController {
        &self.reorder
    }

    pub fn reorder_mut(&mut self) -> &mut ReorderController {
        &mut self.reorder
    }

    pub fn selected_category(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn filter(&self) -> StatusFilter {
        self.filter
    }

    pub fn pending(&self) -> PendingAction {
        self.pending
    }

    pub fn status(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    pub fn form_error(&self) -> Option<&FormError> {
        self.form_error.as_ref()
    }

    pub fn stats(&self) -> Stats {
        self.mirror.stats()
    }

    pub fn drag_view(&self) -> DragView<'_> {
        self.reorder.view()
    }

    /// Views touched since the last call.
    pub fn take_dirty(&mut self) -> Dirty {
        std::mem::take(&mut self.dirty)
    }

    pub fn mark_dirty(&mut self, dirty: Dirty) {
        self.dirty.merge(dirty);
    }

    /// Categories in display order: the optimistic drag order while a session
    /// is active, the latest snapshot's order otherwise.
    pub fn categories(&self) -> Vec<&Category> {
        let snapshot = self.mirror.categories();
        let Some(visual) = self.reorder.visual_order() else {
            return snapshot.iter().collect();
        };

        let present: Vec<Uuid> = snapshot.iter().map(|c| c.id).collect();
        reconciled(visual, &present)
            .into_iter()
            .filter_map(|id| self.mirror.category(id))
            .collect()
    }

    pub fn category_ids(&self) -> Vec<Uuid> {
        self.categories().iter().map(|c| c.id).collect()
    }

    pub fn visible_tasks(&self) -> Vec<&Task> {
        self.mirror.visible_tasks(self.selected, self.filter)
    }

    pub fn select_category(&mut self, id: Option<Uuid>) {
        if self.selected != id {
            self.selected = id;
            self.dirty.tasks = true;
            self.dirty.categories = true;
        }
    }

    pub fn set_filter(&mut self, filter: StatusFilter) {
        if self.filter != filter {
            self.filter = filter;
            self.dirty.tasks = true;
        }
    }

    pub fn set_pending(&mut self, action: PendingAction) {
        self.pending = action;
    }

    pub fn take_pending(&mut self) -> PendingAction {
        std::mem::take(&mut self.pending)
    }

    pub fn set_form_error(&mut self, err: Option<FormError>) {
        self.form_error = err;
    }

    pub fn succeed(&mut self, text: impl Into<String>) {
        let text = text.into();
        info!(%text, "status");
        self.status = Some(StatusMessage {
            level: StatusLevel::Success,
            text,
        });
    }

    pub fn fail(&mut self, text: impl Into<String>) {
        let text = text.into();
        error!(%text, "status");
        self.status = Some(StatusMessage {
            level: StatusLevel::Error,
            text,
        });
    }

    /// Passes `result` through, turning a failure into an error status.
    pub fn track<T>(&mut self, result: anyhow::Result<T>, action: &str) -> anyhow::Result<T> {
        result.map_err(|err| {
            self.fail(format!("failed to {action}: {err:#}"));
            err.context(format!("failed to {action}"))
        })
    }

    /// Feeds one listener event into the mirror.
    pub fn apply_event(&mut self, collection: Collection, event: SnapshotEvent) {
        match self.mirror.apply(collection, event) {
            Applied::Replaced(dirty) => {
                self.dirty.merge(dirty);
                if collection == Collection::Categories
                    && let Some(selected) = self.selected
                    && self.mirror.category(selected).is_none()
                {
                    self.selected = None;
                    self.dirty.tasks = true;
                }
            }
            Applied::Retained(message) => {
                self.fail(format!("failed to sync {collection}: {message}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::reorder::{CardSlot, DragSource};
    use crate::store::Document;

    fn category_doc(name: &str, order: i64) -> Document {
        let Value::Object(fields) = json!({"name": name, "order": order, "createdAt": 0}) else {
            panic!("fixture must be an object");
        };
        Document {
            id: Uuid::new_v4(),
            fields,
        }
    }

    fn category_doc_with_id(id: Uuid, name: &str, order: i64) -> Document {
        Document {
            id,
            ..category_doc(name, order)
        }
    }

    #[test]
    fn task_form_validation_names_the_field() {
        let state = AppState::default();
        let form = TaskForm {
            title: "   ".to_string(),
            ..TaskForm::default()
        };
        assert_eq!(form.validate(state.mirror()), Err(FormError::EmptyTitle));

        let form = TaskForm {
            title: "Buy milk".to_string(),
            ..TaskForm::default()
        };
        let err = form.validate(state.mirror()).expect_err("no category");
        assert_eq!(err.field(), Field::Category);

        let stranger = Uuid::new_v4();
        let form = TaskForm {
            title: "Buy milk".to_string(),
            categories: vec![stranger],
            ..TaskForm::default()
        };
        assert_eq!(
            form.validate(state.mirror()),
            Err(FormError::UnknownCategory(stranger))
        );
    }

    #[test]
    fn recurring_day_out_of_range_is_rejected() {
        let mut state = AppState::default();
        let home = category_doc("Home", 0);
        let home_id = home.id;
        state.apply_event(Collection::Categories, SnapshotEvent::Snapshot(vec![home]));

        let form = TaskForm {
            title: "Laundry".to_string(),
            categories: vec![home_id],
            recurring_day: Some(7),
            ..TaskForm::default()
        };
        let err = form.validate(state.mirror()).expect_err("bad day");
        assert_eq!(err.field(), Field::RecurringDay);
    }

    #[test]
    fn categories_follow_drag_order_until_session_ends() {
        let mut state = AppState::default();
        let docs = vec![
            category_doc("A", 0),
            category_doc("B", 1),
            category_doc("C", 2),
        ];
        let (a, b, c) = (docs[0].id, docs[1].id, docs[2].id);
        state.apply_event(Collection::Categories, SnapshotEvent::Snapshot(docs.clone()));

        let ids = state.category_ids();
        state
            .reorder_mut()
            .start(c, DragSource::Handle, &ids)
            .expect("start");
        state
            .reorder_mut()
            .over(0.0, &CardSlot::uniform(&ids))
            .expect("over");
        assert_eq!(state.category_ids(), vec![c, a, b]);

        // A push mid-drag refreshes content but not the optimistic order.
        state.apply_event(Collection::Categories, SnapshotEvent::Snapshot(docs));
        assert_eq!(state.category_ids(), vec![c, a, b]);

        state.reorder_mut().cancel();
        assert_eq!(state.category_ids(), vec![a, b, c]);
    }

    #[test]
    fn pushes_around_a_drop_decide_the_final_order() {
        let mut state = AppState::default();
        let mut docs = vec![
            category_doc("A", 0),
            category_doc("B", 1),
            category_doc("C", 2),
        ];
        let (a, c) = (docs[0].id, docs[2].id);
        state.apply_event(Collection::Categories, SnapshotEvent::Snapshot(docs.clone()));

        let ids = state.category_ids();
        state
            .reorder_mut()
            .start(c, DragSource::Handle, &ids)
            .expect("start");
        state
            .reorder_mut()
            .over(0.0, &CardSlot::uniform(&ids))
            .expect("over");

        // Another client removes B and adds D while C is in flight.
        docs.remove(1);
        let d = category_doc("D", 0);
        let d_id = d.id;
        docs.insert(0, d);
        state.apply_event(Collection::Categories, SnapshotEvent::Snapshot(docs.clone()));
        assert_eq!(state.category_ids(), vec![c, a, d_id]);

        let displayed = state.category_ids();
        let plan = state.reorder_mut().commit(&displayed).expect("drop");
        assert_eq!(plan.order, vec![c, a, d_id]);

        // A stale push during the commit leaves the frozen order alone.
        state.apply_event(Collection::Categories, SnapshotEvent::Snapshot(docs));
        assert_eq!(state.category_ids(), vec![c, a, d_id]);

        state.reorder_mut().finish().expect("finish");
        let saved = vec![
            category_doc_with_id(c, "C", 0),
            category_doc_with_id(a, "A", 1),
            category_doc_with_id(d_id, "D", 2),
        ];
        state.apply_event(Collection::Categories, SnapshotEvent::Snapshot(saved));
        assert_eq!(state.category_ids(), vec![c, a, d_id]);

        // Once idle, the next snapshot alone decides what is shown.
        let remote = vec![
            category_doc_with_id(d_id, "D", 0),
            category_doc_with_id(c, "C", 1),
        ];
        state.apply_event(Collection::Categories, SnapshotEvent::Snapshot(remote));
        assert_eq!(state.category_ids(), vec![d_id, c]);
    }

    #[test]
    fn selection_clears_when_category_disappears_from_snapshot() {
        let mut state = AppState::default();
        let work = category_doc("Work", 0);
        let work_id = work.id;
        state.apply_event(Collection::Categories, SnapshotEvent::Snapshot(vec![work]));
        state.select_category(Some(work_id));
        state.take_dirty();

        state.apply_event(Collection::Categories, SnapshotEvent::Snapshot(vec![]));
        assert_eq!(state.selected_category(), None);
        assert!(state.take_dirty().tasks);
    }

    #[test]
    fn listener_error_sets_error_status_and_keeps_mirror() {
        let mut state = AppState::default();
        state.apply_event(
            Collection::Categories,
            SnapshotEvent::Snapshot(vec![category_doc("Work", 0)]),
        );
        state.apply_event(
            Collection::Categories,
            SnapshotEvent::Error("permission denied".to_string()),
        );

        assert_eq!(state.categories().len(), 1);
        let status = state.status().expect("status set");
        assert_eq!(status.level, StatusLevel::Error);
        assert!(status.text.contains("categories"));
    }
}

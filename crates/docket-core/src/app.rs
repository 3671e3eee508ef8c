use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{Category, Recurrence, StatusFilter, Task, to_fields};
use crate::reconcile::Dirty;
use crate::renewal::{self, SweepReport};
use crate::reorder::{CardSlot, DragError, DragSource};
use crate::state::{AppState, CategoryForm, PendingAction, TaskForm};
use crate::store::{Collection, Direction, DocumentStore, Query, Subscription};

/// Seeded into an empty categories collection: `(name, icon, color)`.
pub const DEFAULT_CATEGORIES: [(&str, &str, &str); 4] = [
    ("Work", "fas fa-briefcase", "var(--color-primary)"),
    ("Home", "fas fa-home", "var(--color-success)"),
    ("Studies", "fas fa-graduation-cap", "var(--color-warning)"),
    ("Personal", "fas fa-heart", "var(--color-error)"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    pub seed_defaults: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            seed_defaults: true,
        }
    }
}

/// Application state wired to a live document store.
#[derive(Debug)]
pub struct App<S: DocumentStore> {
    store: S,
    state: AppState,
    tz: Tz,
    categories_sub: Option<Subscription>,
    tasks_sub: Option<Subscription>,
    last_sweep: Option<SweepReport>,
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(fields) => fields,
        _ => Map::new(),
    }
}

impl<S: DocumentStore> App<S> {
    /// Probes the store, opens both live queries, seeds defaults, runs one
    /// renewal sweep and applies whatever the store has pushed so far.
    #[tracing::instrument(skip(store, now, tz, options))]
    pub fn start(
        store: S,
        now: DateTime<Utc>,
        tz: Tz,
        options: StartOptions,
    ) -> anyhow::Result<Self> {
        let mut app = Self {
            store,
            state: AppState::default(),
            tz,
            categories_sub: None,
            tasks_sub: None,
            last_sweep: None,
        };

        app.store
            .query(&Query::all(Collection::Categories))
            .context("failed to reach the document store")?;

        app.categories_sub = Some(
            app.store
                .listen(Query::all(Collection::Categories).order_by("order", Direction::Asc))
                .context("failed to subscribe to categories")?,
        );
        app.tasks_sub = Some(
            app.store
                .listen(Query::all(Collection::Tasks).order_by("createdAt", Direction::Desc))
                .context("failed to subscribe to tasks")?,
        );

        if options.seed_defaults {
            let seeded = app.seed_default_categories(now);
            if let Ok(count) = app.state.track(seeded, "seed default categories")
                && count > 0
            {
                info!(count, "seeded default categories");
            }
        }

        let sweep = renewal::sweep(&mut app.store, now, tz);
        match app.state.track(sweep, "renew recurring tasks") {
            Ok(report) => app.last_sweep = Some(report),
            Err(err) => warn!(error = %err, "continuing without renewal"),
        }

        app.pump();
        app.state.succeed("connected");
        Ok(app)
    }

    fn seed_default_categories(&mut self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let existing = self.store.query(&Query::all(Collection::Categories))?;
        if !existing.is_empty() {
            return Ok(0);
        }

        for (order, (name, icon, color)) in DEFAULT_CATEGORIES.iter().enumerate() {
            let category = Category {
                id: Uuid::nil(),
                name: name.to_string(),
                icon: icon.to_string(),
                color: color.to_string(),
                order: order as i64,
                created_at: now,
                updated_at: None,
            };
            self.store
                .create(Collection::Categories, to_fields(&category)?)?;
        }
        Ok(DEFAULT_CATEGORIES.len())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AppState {
        &mut self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// What the startup renewal sweep did, if it ran.
    pub fn last_sweep(&self) -> Option<&SweepReport> {
        self.last_sweep.as_ref()
    }

    /// Applies every event the store has delivered since the last call.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        let subs = [
            (Collection::Categories, &self.categories_sub),
            (Collection::Tasks, &self.tasks_sub),
        ];
        for (collection, sub) in subs {
            let Some(sub) = sub else {
                continue;
            };
            for event in sub.drain() {
                self.state.apply_event(collection, event);
                applied += 1;
            }
        }
        if applied > 0 {
            debug!(applied, "applied store events");
        }
        applied
    }

    /// Creates or renames a category. Returns its id.
    #[tracing::instrument(skip(self, form, now))]
    pub fn submit_category(
        &mut self,
        form: &CategoryForm,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Uuid> {
        if let Err(err) = form.validate() {
            self.state.set_form_error(Some(err.clone()));
            return Err(err.into());
        }
        self.state.set_form_error(None);

        let name = form.name.trim().to_string();
        let id = match form.editing {
            Some(id) => {
                let fields = object(json!({
                    "name": name,
                    "icon": form.icon,
                    "color": form.color,
                    "updatedAt": now.timestamp_millis(),
                }));
                let result = self.store.update(Collection::Categories, id, fields);
                self.state.track(result, "update category")?;
                self.state.succeed(format!("category \"{name}\" updated"));
                id
            }
            None => {
                let order = self
                    .state
                    .mirror()
                    .categories()
                    .iter()
                    .map(|c| c.order)
                    .max()
                    .map_or(0, |last| last + 1);
                let category = Category {
                    id: Uuid::nil(),
                    name: name.clone(),
                    icon: form.icon.clone(),
                    color: form.color.clone(),
                    order,
                    created_at: now,
                    updated_at: None,
                };
                let result = to_fields(&category)
                    .and_then(|fields| self.store.create(Collection::Categories, fields));
                let id = self.state.track(result, "create category")?;
                self.state.succeed(format!("category \"{name}\" created"));
                id
            }
        };

        self.pump();
        Ok(id)
    }

    /// Creates one task per selected category, or updates the edited task.
    /// Returns the ids written.
    #[tracing::instrument(skip(self, form, now))]
    pub fn submit_task(
        &mut self,
        form: &TaskForm,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Uuid>> {
        if let Err(err) = form.validate(self.state.mirror()) {
            self.state.set_form_error(Some(err.clone()));
            return Err(err.into());
        }
        self.state.set_form_error(None);

        let recurrence = form
            .recurring_day
            .map(Recurrence::weekly)
            .unwrap_or_default();

        let written = match form.editing {
            Some(id) => {
                if form.categories.len() > 1 {
                    warn!(
                        count = form.categories.len(),
                        "editing keeps a single category; using the first"
                    );
                }
                let fields = object(json!({
                    "title": form.title.trim(),
                    "description": form.description.trim(),
                    "categoryId": form.categories[0].to_string(),
                    "priority": form.priority,
                    "dueDate": form.due_date,
                    "isRecurring": recurrence.is_recurring,
                    "recurringDay": recurrence.recurring_day,
                    "updatedAt": now.timestamp_millis(),
                }));
                let result = self.store.update(Collection::Tasks, id, fields);
                self.state.track(result, "update task")?;
                self.state.succeed("task updated");
                vec![id]
            }
            None => {
                let mut created = Vec::with_capacity(form.categories.len());
                for category_id in &form.categories {
                    let task = Task {
                        id: Uuid::nil(),
                        title: form.title.trim().to_string(),
                        description: form.description.trim().to_string(),
                        category_id: *category_id,
                        priority: form.priority,
                        due_date: form.due_date,
                        completed: false,
                        recurrence: recurrence.clone(),
                        created_at: now,
                        updated_at: None,
                    };
                    let result = to_fields(&task)
                        .and_then(|fields| self.store.create(Collection::Tasks, fields));
                    match self.state.track(result, "create task") {
                        Ok(id) => created.push(id),
                        Err(err) => {
                            self.pump();
                            return Err(err);
                        }
                    }
                }
                self.state.succeed(match created.len() {
                    1 => "task created".to_string(),
                    n => format!("{n} tasks created"),
                });
                created
            }
        };

        self.pump();
        Ok(written)
    }

    #[tracing::instrument(skip(self, now))]
    pub fn set_completed(
        &mut self,
        id: Uuid,
        completed: bool,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let fields = object(json!({
            "completed": completed,
            "updatedAt": now.timestamp_millis(),
        }));
        let result = self.store.update(Collection::Tasks, id, fields);
        self.state.track(result, "update task")?;
        self.state.succeed(if completed {
            "task completed"
        } else {
            "task reopened"
        });
        self.pump();
        Ok(())
    }

    /// Arms a category delete and returns the confirmation prompt.
    pub fn request_delete_category(&mut self, id: Uuid) -> anyhow::Result<String> {
        let mirror = self.state.mirror();
        let category = mirror
            .category(id)
            .ok_or_else(|| anyhow!("unknown category: {id}"))?;
        let prompt = match mirror.task_count(id) {
            0 => format!("Delete category \"{}\"?", category.name),
            1 => format!(
                "Delete category \"{}\"? Its 1 task will also be deleted.",
                category.name
            ),
            n => format!(
                "Delete category \"{}\"? All {n} of its tasks will also be deleted.",
                category.name
            ),
        };
        self.state
            .set_pending(PendingAction::ConfirmDeleteCategory(id));
        Ok(prompt)
    }

    pub fn request_delete_task(&mut self, id: Uuid) -> anyhow::Result<String> {
        let task = self
            .state
            .mirror()
            .task(id)
            .ok_or_else(|| anyhow!("unknown task: {id}"))?;
        let prompt = format!("Delete task \"{}\"?", task.title);
        self.state.set_pending(PendingAction::ConfirmDeleteTask(id));
        Ok(prompt)
    }

    /// Runs the pending action. Returns false when nothing was pending.
    pub fn confirm(&mut self) -> anyhow::Result<bool> {
        match self.state.take_pending() {
            PendingAction::None => Ok(false),
            PendingAction::ConfirmDeleteCategory(id) => self.delete_category(id).map(|_| true),
            PendingAction::ConfirmDeleteTask(id) => self.delete_task(id).map(|_| true),
        }
    }

    pub fn cancel(&mut self) -> bool {
        let was = self.state.take_pending();
        was != PendingAction::None
    }

    /// Deletes the category's tasks one by one, then the category. Stops at the
    /// first failure; earlier deletes stay deleted. Returns the tasks removed.
    #[tracing::instrument(skip(self))]
    fn delete_category(&mut self, id: Uuid) -> anyhow::Result<usize> {
        let query = Query::all(Collection::Tasks).where_eq("categoryId", id.to_string());
        let result = self.store.query(&query);
        let children = self.state.track(result, "delete category")?;

        let mut removed = 0;
        for doc in &children {
            let result = self.store.delete(Collection::Tasks, doc.id);
            if let Err(err) = self.state.track(result, "delete category") {
                warn!(removed, remaining = children.len() - removed, "cascade stopped");
                self.pump();
                return Err(err);
            }
            removed += 1;
        }

        let result = self.store.delete(Collection::Categories, id);
        if let Err(err) = self.state.track(result, "delete category") {
            self.pump();
            return Err(err);
        }

        if self.state.selected_category() == Some(id) {
            self.state.select_category(None);
        }
        info!(tasks = removed, "category deleted");
        self.state.succeed("category deleted");
        self.pump();
        Ok(removed)
    }

    #[tracing::instrument(skip(self))]
    fn delete_task(&mut self, id: Uuid) -> anyhow::Result<()> {
        let result = self.store.delete(Collection::Tasks, id);
        self.state.track(result, "delete task")?;
        self.state.succeed("task deleted");
        self.pump();
        Ok(())
    }

    pub fn select_category(&mut self, id: Option<Uuid>) {
        self.state.select_category(id);
    }

    pub fn set_filter(&mut self, filter: StatusFilter) {
        self.state.set_filter(filter);
    }

    pub fn drag_start(&mut self, id: Uuid, source: DragSource) -> Result<(), DragError> {
        let current = self.state.category_ids();
        self.state.reorder_mut().start(id, source, &current)?;
        self.state.mark_dirty(Dirty {
            categories: true,
            ..Dirty::default()
        });
        Ok(())
    }

    pub fn drag_over(&mut self, pointer_y: f64, layout: &[CardSlot]) -> Result<bool, DragError> {
        let changed = self.state.reorder_mut().over(pointer_y, layout)?;
        if changed {
            self.state.mark_dirty(Dirty {
                categories: true,
                ..Dirty::default()
            });
        }
        Ok(changed)
    }

    /// Persists the displayed order as one batch and ends the session. On
    /// failure the list falls back to the last snapshot.
    #[tracing::instrument(skip(self))]
    pub fn drop_dragged(&mut self) -> anyhow::Result<()> {
        self.pump();
        let displayed = self.state.category_ids();
        let plan = self.state.reorder_mut().commit(&displayed)?;
        let result = self.store.commit(plan.to_batch());
        self.state.reorder_mut().finish()?;
        self.state.mark_dirty(Dirty {
            categories: true,
            ..Dirty::default()
        });
        self.pump();

        self.state.track(result, "save category order")?;
        self.state.succeed("categories reordered");
        Ok(())
    }

    pub fn drag_cancel(&mut self) -> bool {
        let cancelled = self.state.reorder_mut().cancel();
        if cancelled {
            self.state.mark_dirty(Dirty {
                categories: true,
                ..Dirty::default()
            });
        }
        cancelled
    }

    /// Closes both live queries.
    pub fn stop(&mut self) {
        for sub in [self.categories_sub.take(), self.tasks_sub.take()]
            .into_iter()
            .flatten()
        {
            self.store.unlisten(sub.id);
        }
        debug!("listeners closed");
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::datastore::DataStore;
    use crate::model::Priority;
    use crate::state::FormError;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 2, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn started() -> App<DataStore> {
        App::start(
            DataStore::in_memory(),
            now(),
            chrono_tz::UTC,
            StartOptions::default(),
        )
        .expect("start app")
    }

    #[test]
    fn empty_store_is_seeded_with_default_categories_in_order() {
        let app = started();
        let names: Vec<_> = app
            .state()
            .categories()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["Work", "Home", "Studies", "Personal"]);
        assert_eq!(app.store().listener_count(), 2);
    }

    #[test]
    fn seeding_can_be_disabled() {
        let app = App::start(
            DataStore::in_memory(),
            now(),
            chrono_tz::UTC,
            StartOptions {
                seed_defaults: false,
            },
        )
        .expect("start app");
        assert!(app.state().categories().is_empty());
    }

    #[test]
    fn task_for_several_categories_creates_independent_records() {
        let mut app = started();
        let ids = app.state().category_ids();
        let form = TaskForm {
            title: "Review budget".to_string(),
            categories: vec![ids[0], ids[2]],
            priority: Priority::High,
            ..TaskForm::default()
        };

        let created = app.submit_task(&form, now()).expect("submit task");
        assert_eq!(created.len(), 2);
        assert_eq!(app.state().mirror().task_count(ids[0]), 1);
        assert_eq!(app.state().mirror().task_count(ids[2]), 1);

        app.set_completed(created[0], true, now())
            .expect("complete one");
        let tasks = app.state().mirror().tasks();
        assert_eq!(tasks.iter().filter(|t| t.completed).count(), 1);
    }

    #[test]
    fn invalid_form_is_reported_before_any_write() {
        let mut app = started();
        let form = CategoryForm {
            name: "  ".to_string(),
            ..CategoryForm::default()
        };
        let err = app
            .submit_category(&form, now())
            .expect_err("empty name");
        assert_eq!(err.downcast_ref::<FormError>(), Some(&FormError::EmptyName));
        assert_eq!(app.state().form_error(), Some(&FormError::EmptyName));
        assert_eq!(app.state().categories().len(), 4);
    }

    #[test]
    fn new_category_is_appended_after_existing_ones() {
        let mut app = started();
        let form = CategoryForm {
            name: "Garden".to_string(),
            icon: "fas fa-leaf".to_string(),
            color: "#2e7d32".to_string(),
            ..CategoryForm::default()
        };
        let id = app.submit_category(&form, now()).expect("create");
        let last = app.state().categories().last().map(|c| c.id);
        assert_eq!(last, Some(id));
    }

    #[test]
    fn new_category_goes_last_even_after_deletes() {
        let mut app = started();
        for id in app.state().category_ids().into_iter().take(2) {
            app.request_delete_category(id).expect("prompt");
            app.confirm().expect("delete");
        }

        let form = CategoryForm {
            name: "Garden".to_string(),
            ..CategoryForm::default()
        };
        let id = app.submit_category(&form, now()).expect("create");
        let orders: Vec<(&str, i64)> = app
            .state()
            .categories()
            .iter()
            .map(|c| (c.name.as_str(), c.order))
            .collect();
        assert_eq!(
            orders,
            vec![("Studies", 2), ("Personal", 3), ("Garden", 4)]
        );
        assert_eq!(app.state().category_ids().last(), Some(&id));
    }

    #[test]
    fn first_category_of_an_empty_list_gets_order_zero() {
        let mut app = App::start(
            DataStore::in_memory(),
            now(),
            chrono_tz::UTC,
            StartOptions {
                seed_defaults: false,
            },
        )
        .expect("start app");
        let form = CategoryForm {
            name: "Garden".to_string(),
            ..CategoryForm::default()
        };
        app.submit_category(&form, now()).expect("create");
        assert_eq!(app.state().categories()[0].order, 0);
    }

    #[test]
    fn cancel_clears_pending_delete() {
        let mut app = started();
        let id = app.state().category_ids()[0];
        let prompt = app.request_delete_category(id).expect("prompt");
        assert!(prompt.contains("Work"));
        assert!(app.cancel());
        assert!(!app.confirm().expect("nothing pending"));
        assert_eq!(app.state().categories().len(), 4);
    }

    #[test]
    fn stop_closes_both_listeners() {
        let mut app = started();
        app.stop();
        assert_eq!(app.store().listener_count(), 0);
    }
}

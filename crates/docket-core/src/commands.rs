use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::app::App;
use crate::cli::{CategoryCommand, Command, TaskCommand, TaskEditArgs, TaskFields};
use crate::datetime::{day_name, local_date, parse_due_date, parse_weekday, weekday_index};
use crate::model::{Category, StatusFilter, Task};
use crate::render::{Renderer, short_id};
use crate::reorder::{CardSlot, DragSource};
use crate::state::{CategoryForm, TaskForm};
use crate::store::DocumentStore;

#[instrument(skip_all)]
pub fn dispatch<S: DocumentStore>(
    app: &mut App<S>,
    renderer: &Renderer,
    command: Command,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    let result = match command {
        Command::Categories => cmd_categories(app, renderer),
        Command::Category(sub) => match sub {
            CategoryCommand::Add { name, icon, color } => {
                cmd_category_add(app, name, icon, color, now)
            }
            CategoryCommand::Edit {
                category,
                name,
                icon,
                color,
            } => cmd_category_edit(app, &category, name, icon, color, now),
            CategoryCommand::Delete { category, yes } => cmd_category_delete(app, &category, yes),
            CategoryCommand::Move { category, position } => {
                cmd_category_move(app, renderer, &category, position)
            }
        },
        Command::Task(sub) => match sub {
            TaskCommand::Add {
                title,
                categories,
                fields,
            } => cmd_task_add(app, title, &categories, fields, now),
            TaskCommand::Edit(args) => cmd_task_edit(app, args, now),
            TaskCommand::Done { task } => cmd_task_complete(app, &task, true, now),
            TaskCommand::Undo { task } => cmd_task_complete(app, &task, false, now),
            TaskCommand::Delete { task, yes } => cmd_task_delete(app, &task, yes),
        },
        Command::List { category, status } => {
            cmd_list(app, renderer, category.as_deref(), status, now)
        }
        Command::Stats => renderer.print_stats(app.state().stats()),
        Command::Renew => cmd_renew(app, renderer, now),
    };

    if let Some(status) = app.state().status() {
        renderer.print_status(status);
    }
    result
}

fn cmd_categories<S: DocumentStore>(app: &App<S>, renderer: &Renderer) -> anyhow::Result<()> {
    let state = app.state();
    renderer.print_categories(&state.categories(), state.mirror())
}

fn cmd_category_add<S: DocumentStore>(
    app: &mut App<S>,
    name: String,
    icon: String,
    color: String,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let form = CategoryForm {
        editing: None,
        name,
        icon,
        color,
    };
    let id = app.submit_category(&form, now)?;
    println!("Created category {}.", short_id(&id));
    Ok(())
}

fn cmd_category_edit<S: DocumentStore>(
    app: &mut App<S>,
    reference: &str,
    name: Option<String>,
    icon: Option<String>,
    color: Option<String>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let current = resolve_category(app, reference)?.clone();
    let form = CategoryForm {
        editing: Some(current.id),
        name: name.unwrap_or(current.name),
        icon: icon.unwrap_or(current.icon),
        color: color.unwrap_or(current.color),
    };
    app.submit_category(&form, now)?;
    Ok(())
}

fn cmd_category_delete<S: DocumentStore>(
    app: &mut App<S>,
    reference: &str,
    yes: bool,
) -> anyhow::Result<()> {
    let id = resolve_category(app, reference)?.id;
    let prompt = app.request_delete_category(id)?;
    confirm_or_cancel(app, &prompt, yes)
}

/// Moves a category by replaying a drag over a uniform card layout, so the
/// same midpoint placement decides the result.
#[instrument(skip(app, renderer))]
fn cmd_category_move<S: DocumentStore>(
    app: &mut App<S>,
    renderer: &Renderer,
    reference: &str,
    position: usize,
) -> anyhow::Result<()> {
    let id = resolve_category(app, reference)?.id;
    let order = app.state().category_ids();
    if position == 0 || position > order.len() {
        bail!("position must be between 1 and {}", order.len());
    }

    let layout = CardSlot::uniform(&order);
    let pointer_y = pointer_for_position(&layout, id, position - 1);
    debug!(%id, position, pointer_y, "replaying drag");

    app.drag_start(id, DragSource::Handle)?;
    app.drag_over(pointer_y, &layout)?;
    app.drop_dragged()?;

    info!(%id, position, "category moved");
    cmd_categories(app, renderer)
}

/// A pointer height that slots `dragged` at `target` among the other cards.
pub fn pointer_for_position(layout: &[CardSlot], dragged: Uuid, target: usize) -> f64 {
    let others: Vec<&CardSlot> = layout.iter().filter(|slot| slot.id != dragged).collect();
    match others.get(target) {
        Some(slot) => slot.midpoint() - slot.height / 4.0,
        None => others
            .last()
            .map(|slot| slot.top + slot.height + 1.0)
            .unwrap_or(0.0),
    }
}

fn cmd_task_add<S: DocumentStore>(
    app: &mut App<S>,
    title: String,
    categories: &[String],
    fields: TaskFields,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let tz = app.timezone();
    let categories = categories
        .iter()
        .map(|reference| resolve_category(&*app, reference).map(|c| c.id))
        .collect::<anyhow::Result<Vec<Uuid>>>()?;

    let form = TaskForm {
        editing: None,
        title,
        description: fields.description.unwrap_or_default(),
        categories,
        priority: fields.priority.unwrap_or_default(),
        due_date: fields
            .due
            .map(|raw| parse_due_date(&raw, now, tz))
            .transpose()?,
        recurring_day: fields.every.map(|raw| parse_weekday(&raw)).transpose()?,
    };

    let created = app.submit_task(&form, now)?;
    for id in created {
        println!("Created task {}.", short_id(&id));
    }
    Ok(())
}

fn cmd_task_edit<S: DocumentStore>(
    app: &mut App<S>,
    args: TaskEditArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let TaskEditArgs {
        task,
        title,
        category,
        fields,
        no_due,
        once,
    } = args;
    let tz = app.timezone();
    let current = resolve_task(app, &task)?.clone();
    let category_id = match category {
        Some(reference) => resolve_category(app, &reference)?.id,
        None => current.category_id,
    };

    let due_date = if no_due {
        None
    } else {
        match fields.due {
            Some(raw) => Some(parse_due_date(&raw, now, tz)?),
            None => current.due_date,
        }
    };
    let recurring_day = if once {
        None
    } else {
        match fields.every {
            Some(raw) => Some(parse_weekday(&raw)?),
            None => current.recurrence.day(),
        }
    };

    let form = TaskForm {
        editing: Some(current.id),
        title: title.unwrap_or(current.title),
        description: fields.description.unwrap_or(current.description),
        categories: vec![category_id],
        priority: fields.priority.unwrap_or(current.priority),
        due_date,
        recurring_day,
    };
    app.submit_task(&form, now)?;
    Ok(())
}

fn cmd_task_complete<S: DocumentStore>(
    app: &mut App<S>,
    reference: &str,
    completed: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let id = resolve_task(app, reference)?.id;
    app.set_completed(id, completed, now)
}

fn cmd_task_delete<S: DocumentStore>(
    app: &mut App<S>,
    reference: &str,
    yes: bool,
) -> anyhow::Result<()> {
    let id = resolve_task(app, reference)?.id;
    let prompt = app.request_delete_task(id)?;
    confirm_or_cancel(app, &prompt, yes)
}

fn cmd_list<S: DocumentStore>(
    app: &mut App<S>,
    renderer: &Renderer,
    category: Option<&str>,
    status: StatusFilter,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let selected = category
        .map(|reference| resolve_category(&*app, reference).map(|c| c.id))
        .transpose()?;
    app.select_category(selected);
    app.set_filter(status);

    let today = local_date(now, app.timezone());
    let state = app.state();
    renderer.print_tasks(&state.visible_tasks(), state.mirror(), today)
}

fn cmd_renew<S: DocumentStore>(
    app: &App<S>,
    renderer: &Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    if let Some(report) = app.last_sweep() {
        renderer.print_sweep(report)?;
    }

    let weekly: Vec<&Task> = app
        .state()
        .mirror()
        .tasks()
        .iter()
        .filter(|task| task.recurrence.day().is_some())
        .collect();
    if weekly.is_empty() {
        return Ok(());
    }

    println!(
        "Today is {}.",
        day_name(weekday_index(now, app.timezone()))
    );
    let today = local_date(now, app.timezone());
    renderer.print_tasks(&weekly, app.state().mirror(), today)
}

fn confirm_or_cancel<S: DocumentStore>(
    app: &mut App<S>,
    prompt: &str,
    yes: bool,
) -> anyhow::Result<()> {
    if yes || ask(prompt)? {
        app.confirm()?;
    } else {
        app.cancel();
        println!("Cancelled.");
    }
    Ok(())
}

fn ask(prompt: &str) -> anyhow::Result<bool> {
    let mut out = io::stdout().lock();
    write!(out, "{prompt} [y/N] ")?;
    out.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Exact name (case-insensitive) or a unique id prefix.
pub fn resolve_category<'a, S: DocumentStore>(
    app: &'a App<S>,
    reference: &str,
) -> anyhow::Result<&'a Category> {
    let categories = app.state().mirror().categories();
    if let Some(category) = categories
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(reference.trim()))
    {
        return Ok(category);
    }
    by_id_prefix(categories, reference, |c| c.id)
        .map_err(|err| anyhow!("category {reference}: {err}"))
}

pub fn resolve_task<'a, S: DocumentStore>(
    app: &'a App<S>,
    reference: &str,
) -> anyhow::Result<&'a Task> {
    by_id_prefix(app.state().mirror().tasks(), reference, |t| t.id)
        .map_err(|err| anyhow!("task {reference}: {err}"))
}

fn by_id_prefix<'a, T>(
    items: &'a [T],
    reference: &str,
    id: impl Fn(&T) -> Uuid,
) -> anyhow::Result<&'a T> {
    let needle = reference.trim().to_ascii_lowercase().replace('-', "");
    if needle.is_empty() {
        bail!("empty reference");
    }

    let mut hits = items
        .iter()
        .filter(|item| id(item).simple().to_string().starts_with(&needle));
    let first = hits.next().ok_or_else(|| anyhow!("not found"))?;
    if hits.next().is_some() {
        bail!("ambiguous id prefix");
    }
    Ok(first)
}

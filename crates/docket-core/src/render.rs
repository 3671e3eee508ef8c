use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::day_name;
use crate::model::{Category, Priority, Task};
use crate::reconcile::{Reconciler, Stats};
use crate::renewal::SweepReport;
use crate::state::{StatusLevel, StatusMessage};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    #[tracing::instrument(skip_all)]
    pub fn print_categories(
        &self,
        categories: &[&Category],
        mirror: &Reconciler,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = ["#", "ID", "Name", "Tasks", "Icon"];

        let rows = categories
            .iter()
            .enumerate()
            .map(|(idx, category)| {
                vec![
                    (idx + 1).to_string(),
                    self.paint(&short_id(&category.id), "33"),
                    category.name.clone(),
                    mirror.task_count(category.id).to_string(),
                    category.icon.clone(),
                ]
            })
            .collect();

        write_table(&mut out, &headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub fn print_tasks(
        &self,
        tasks: &[&Task],
        mirror: &Reconciler,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = ["ID", "", "Pri", "Due", "Category", "Title", "Repeats"];
        let mut rows = Vec::with_capacity(tasks.len());

        for task in tasks {
            let done = if task.completed { "x" } else { " " };
            let due = task
                .due_date
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            let due = if task.is_overdue(today) {
                self.paint(&due, "31")
            } else {
                due
            };
            let priority = match task.priority {
                Priority::High => self.paint("H", "31"),
                Priority::Medium => "M".to_string(),
                Priority::Low => self.paint("L", "2"),
            };
            let category = mirror
                .category(task.category_id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| "?".to_string());
            let title = if task.completed {
                self.paint(&task.title, "9")
            } else {
                task.title.clone()
            };
            let repeats = task
                .recurrence
                .day()
                .map(|day| day_name(day).to_string())
                .unwrap_or_default();

            rows.push(vec![
                self.paint(&short_id(&task.id), "33"),
                done.to_string(),
                priority,
                due,
                category,
                title,
                repeats,
            ]);
        }

        write_table(&mut out, &headers, rows)?;
        Ok(())
    }

    pub fn print_stats(&self, stats: Stats) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "total      {}", stats.total)?;
        writeln!(out, "completed  {}", self.paint(&stats.completed.to_string(), "32"))?;
        writeln!(out, "pending    {}", self.paint(&stats.pending.to_string(), "33"))?;
        Ok(())
    }

    pub fn print_sweep(&self, report: &SweepReport) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(
            out,
            "Renewed {} of {} recurring task(s).",
            report.renewed.len(),
            report.scanned
        )?;
        if !report.failed.is_empty() {
            let failed = format!("{} renewal(s) failed.", report.failed.len());
            writeln!(out, "{}", self.paint(&failed, "31"))?;
        }
        Ok(())
    }

    /// Status messages go to stderr so table output stays pipeable.
    pub fn print_status(&self, status: &StatusMessage) {
        let text = match status.level {
            StatusLevel::Success => self.paint(&status.text, "32"),
            StatusLevel::Error => self.paint(&status.text, "31"),
        };
        eprintln!("{text}");
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

pub fn short_id(id: &uuid::Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn write_table<W: Write>(
    mut writer: W,
    headers: &[&str],
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(*header))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_pads_by_display_width_ignoring_colour() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            &["Name", "Tasks"],
            vec![
                vec!["Studies".to_string(), "\x1b[33m3\x1b[0m".to_string()],
                vec!["日本".to_string(), "12".to_string()],
            ],
        )
        .expect("write table");

        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Name    Tasks ");
        assert_eq!(lines[1], "------- ----- ");
        assert_eq!(lines[3], "日本    12    ");
    }

    #[test]
    fn short_id_is_eight_hex_chars() {
        let id = uuid::Uuid::new_v4();
        let short = short_id(&id);
        assert_eq!(short.len(), 8);
        assert!(id.simple().to_string().starts_with(&short));
    }
}

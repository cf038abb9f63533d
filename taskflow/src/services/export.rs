//! Data export
//!
//! One-way export of the loaded tasks and projects. Tasks go out as CSV,
//! projects and the full dump as pretty-printed JSON.

use crate::config::{EXPORT_ALL_FILE, EXPORT_PROJECTS_FILE, EXPORT_TASKS_FILE};
use crate::error::{AppError, Result};
use crate::models::{Profile, ProjectWithDetails, TaskWithDetails};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;

const TASK_COLUMNS: &[&str] = &[
    "title",
    "description",
    "status",
    "priority",
    "start_date",
    "due_date",
    "progress",
    "created_at",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Tasks,
    Projects,
    All,
}

impl ExportKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            ExportKind::Tasks => EXPORT_TASKS_FILE,
            ExportKind::Projects => EXPORT_PROJECTS_FILE,
            ExportKind::All => EXPORT_ALL_FILE,
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportKind::Tasks => "tasks",
            ExportKind::Projects => "projects",
            ExportKind::All => "all",
        })
    }
}

impl FromStr for ExportKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tasks" => Ok(ExportKind::Tasks),
            "projects" => Ok(ExportKind::Projects),
            "all" => Ok(ExportKind::All),
            other => Err(AppError::Validation(format!("Unknown export type: {}", other))),
        }
    }
}

#[derive(Serialize)]
struct FullExport<'a> {
    tasks: &'a [TaskWithDetails],
    projects: &'a [ProjectWithDetails],
    profile: Option<&'a Profile>,
}

/// Quote a CSV field when it contains a delimiter, quote or line break
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_date(value: Option<DateTime<Utc>>) -> String {
    value.map(|d| d.to_rfc3339()).unwrap_or_default()
}

/// Tasks as CSV with a header row
pub fn tasks_csv(tasks: &[TaskWithDetails]) -> String {
    let mut out = TASK_COLUMNS.join(",");
    out.push('\n');

    for task in tasks {
        let fields = [
            csv_field(&task.title),
            csv_field(&task.description),
            task.status.to_string(),
            task.priority.to_string(),
            csv_date(task.start_date),
            csv_date(task.due_date),
            task.progress.to_string(),
            task.created_at.to_rfc3339(),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

pub fn projects_json(projects: &[ProjectWithDetails]) -> Result<String> {
    Ok(serde_json::to_string_pretty(projects)?)
}

pub fn all_json(
    tasks: &[TaskWithDetails],
    projects: &[ProjectWithDetails],
    profile: Option<&Profile>,
) -> Result<String> {
    Ok(serde_json::to_string_pretty(&FullExport {
        tasks,
        projects,
        profile,
    })?)
}

/// Render `kind` and write it into `dir` under its fixed file name
pub async fn write_export(
    dir: &Path,
    kind: ExportKind,
    tasks: &[TaskWithDetails],
    projects: &[ProjectWithDetails],
    profile: Option<&Profile>,
) -> Result<PathBuf> {
    let content = match kind {
        ExportKind::Tasks => tasks_csv(tasks),
        ExportKind::Projects => projects_json(projects)?,
        ExportKind::All => all_json(tasks, projects, profile)?,
    };

    fs::create_dir_all(dir).await?;
    let path = dir.join(kind.file_name());
    fs::write(&path, content).await?;

    tracing::info!("Exported {} to {:?}", kind, path);
    Ok(path)
}

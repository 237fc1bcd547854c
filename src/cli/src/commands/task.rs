//! Task lifecycle commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use uuid::Uuid;

use popug_core::app::App;
use popug_core::tasks::{NewTask, Task, TaskId, TaskStatus, TaskUpdate};

use super::flush_outbox;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a task and assign it to a random assignee
    Create {
        /// Task title
        #[arg(short, long)]
        title: String,

        /// Task description
        #[arg(short, long)]
        description: String,

        /// Optional Jira reference
        #[arg(short, long)]
        jira_id: Option<String>,
    },

    /// List tasks, oldest first
    List {
        /// Filter by status (Assigned, Completed)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show one task
    Get {
        /// Task ID
        task_id: Uuid,
    },

    /// Update task fields
    Update {
        /// Task ID
        task_id: Uuid,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        jira_id: Option<String>,

        /// New status (Assigned, Completed)
        #[arg(long)]
        status: Option<String>,
    },

    /// Mark a task completed
    Complete {
        /// Task ID
        task_id: Uuid,
    },

    /// Reassign every task to a random assignee
    Reassign,

    /// Delete a task
    Delete {
        /// Task ID
        task_id: Uuid,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Jira")]
    jira_id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Assignee")]
    assignee_id: String,
    #[tabled(rename = "Created")]
    created: String,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.to_string(),
            title: task.title.clone(),
            jira_id: task.jira_id.clone(),
            status: task.status.to_string(),
            assignee_id: task.assignee_id.to_string(),
            created: task.created.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

fn print_task(task: &Task, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            output::print_header(&format!("Task {}", task.id));
            output::print_detail("Title", &task.title);
            output::print_detail("Description", &task.description);
            output::print_detail("Jira", &task.jira_id);
            output::print_detail("Status", task.status.as_str());
            output::print_detail("Assignee", &task.assignee_id.to_string());
            output::print_detail("Created", &task.created.to_rfc3339());
            Ok(())
        }
        _ => output::print_item(task, format),
    }
}

fn parse_status(status: Option<String>) -> Result<Option<TaskStatus>> {
    status
        .map(|s| s.parse::<TaskStatus>().context("Invalid --status"))
        .transpose()
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: TaskCommands, app: &App, format: OutputFormat) -> Result<()> {
    match cmd {
        TaskCommands::Create {
            title,
            description,
            jira_id,
        } => {
            let mut new = NewTask::new(title, description);
            if let Some(jira_id) = jira_id {
                new = new.with_jira_id(jira_id);
            }
            let task = app.tasks.create_task(new).await?;
            flush_outbox(app).await?;

            if let OutputFormat::Table = format {
                output::print_success("Task created");
            }
            print_task(&task, format)?;
        }

        TaskCommands::List { status } => {
            let status = parse_status(status)?;
            let rows: Vec<TaskRow> = app
                .tasks
                .list_tasks()
                .await?
                .iter()
                .filter(|t| status.map_or(true, |s| t.status == s))
                .map(TaskRow::from)
                .collect();
            output::print_list(&rows, format)?;
        }

        TaskCommands::Get { task_id } => {
            let task = app.tasks.get_task(TaskId(task_id)).await?;
            print_task(&task, format)?;
        }

        TaskCommands::Update {
            task_id,
            title,
            description,
            jira_id,
            status,
        } => {
            let update = TaskUpdate {
                title,
                description,
                jira_id,
                status: parse_status(status)?,
            };
            let task = app.tasks.update_task(TaskId(task_id), update).await?;
            flush_outbox(app).await?;

            if let OutputFormat::Table = format {
                output::print_success("Task updated");
            }
            print_task(&task, format)?;
        }

        TaskCommands::Complete { task_id } => {
            let task = app.tasks.complete_task(TaskId(task_id)).await?;
            flush_outbox(app).await?;

            if let OutputFormat::Table = format {
                output::print_success("Task completed");
            }
            print_task(&task, format)?;
        }

        TaskCommands::Reassign => {
            let tasks = app.tasks.reassign_all_tasks().await?;
            flush_outbox(app).await?;

            if let OutputFormat::Table = format {
                output::print_success(&format!("Reassigned {} task(s)", tasks.len()));
            }
            let rows: Vec<TaskRow> = tasks.iter().map(TaskRow::from).collect();
            output::print_list(&rows, format)?;
        }

        TaskCommands::Delete { task_id } => {
            app.tasks.delete_task(TaskId(task_id)).await?;
            match format {
                OutputFormat::Table => output::print_success(&format!("Task {} deleted", task_id)),
                _ => output::print_item(&serde_json::json!({ "id": task_id, "deleted": true }), format)?,
            }
        }
    }

    Ok(())
}

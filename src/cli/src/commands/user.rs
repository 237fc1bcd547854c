//! Identity commands.
//!
//! These publish identity events the way the auth service would; the
//! services' consumers apply them to their projections.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use uuid::Uuid;

use popug_core::app::App;
use popug_core::events::IdentityPayload;
use popug_core::projection::{Assignee, AssigneeId};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum UserCommands {
    /// Publish UserCreated
    Create {
        /// Username
        #[arg(short, long)]
        username: String,

        /// Role carried on the event
        #[arg(short, long)]
        role: Option<String>,

        /// Identity ID (generated when omitted)
        #[arg(long)]
        id: Option<Uuid>,

        /// Also apply the event to the local projection
        #[arg(long)]
        apply: bool,
    },

    /// Publish UserUpdated
    Update {
        /// Identity ID
        id: Uuid,

        #[arg(short, long)]
        username: Option<String>,

        #[arg(short, long)]
        role: Option<String>,

        /// Also apply the event to the local projection
        #[arg(long)]
        apply: bool,
    },

    /// Publish UserDeleted
    Delete {
        /// Identity ID
        id: Uuid,

        /// Also apply the event to the local projection
        #[arg(long)]
        apply: bool,
    },

    /// List the local assignee projection
    List,
}

#[derive(Debug, Serialize, Tabled)]
struct AssigneeRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Username")]
    username: String,
}

impl From<&Assignee> for AssigneeRow {
    fn from(a: &Assignee) -> Self {
        Self {
            id: a.id.to_string(),
            username: a.username.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Published {
    event: &'static str,
    id: Uuid,
}

fn report(event: &'static str, id: Uuid, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            output::print_success(&format!("{} published", event));
            output::print_detail("ID", &id.to_string());
            Ok(())
        }
        _ => output::print_item(&Published { event, id }, format),
    }
}

pub async fn execute(cmd: UserCommands, app: &App, format: OutputFormat) -> Result<()> {
    let publisher = app.identity_publisher();

    match cmd {
        UserCommands::Create {
            username,
            role,
            id,
            apply,
        } => {
            let id = id.unwrap_or_else(Uuid::new_v4);
            publisher.user_created(id, &username, role.as_deref()).await?;
            if apply {
                app.projection
                    .upsert(&IdentityPayload {
                        id,
                        username: Some(username),
                        role,
                    })
                    .await?;
            }
            report("UserCreated", id, format)?;
        }

        UserCommands::Update {
            id,
            username,
            role,
            apply,
        } => {
            publisher
                .user_updated(id, username.as_deref(), role.as_deref())
                .await?;
            if apply {
                app.projection
                    .upsert(&IdentityPayload { id, username, role })
                    .await?;
            }
            report("UserUpdated", id, format)?;
        }

        UserCommands::Delete { id, apply } => {
            publisher.user_deleted(id).await?;
            if apply {
                app.projection.delete(AssigneeId(id)).await?;
            }
            report("UserDeleted", id, format)?;
        }

        UserCommands::List => {
            let assignees = app.projection.get_all().await?;
            let rows: Vec<AssigneeRow> = assignees.iter().map(AssigneeRow::from).collect();
            output::print_list(&rows, format)?;
        }
    }

    Ok(())
}

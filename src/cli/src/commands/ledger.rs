//! Ledger queries.

use anyhow::Result;
use chrono::NaiveDate;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use uuid::Uuid;

use popug_core::app::App;
use popug_core::ledger::{AssigneeBalance, AuditRecord};
use popug_core::projection::AssigneeId;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// All-time balance of one assignee
    Balance {
        /// Assignee ID
        assignee_id: Uuid,
    },

    /// Audit trail of one assignee
    Audit {
        /// Assignee ID
        assignee_id: Uuid,
    },

    /// Management income for a UTC day
    Income {
        /// Day as YYYY-MM-DD (defaults to today)
        #[arg(short, long)]
        day: Option<NaiveDate>,
    },

    /// Per-assignee balances for a UTC day
    Daily {
        /// Day as YYYY-MM-DD (defaults to today)
        #[arg(short, long)]
        day: Option<NaiveDate>,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct AuditRow {
    #[tabled(rename = "Event")]
    event_name: String,
    #[tabled(rename = "Task")]
    task_title: String,
    #[tabled(rename = "Jira")]
    jira_id: String,
    #[tabled(rename = "Amount")]
    amount: i64,
    #[tabled(rename = "At")]
    created: String,
}

impl From<&AuditRecord> for AuditRow {
    fn from(record: &AuditRecord) -> Self {
        Self {
            event_name: record.event_name.clone(),
            task_title: record.task_title.clone(),
            jira_id: record.jira_id.clone(),
            amount: record.amount,
            created: record.created.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct BalanceRow {
    #[tabled(rename = "Assignee")]
    assignee_id: String,
    #[tabled(rename = "Balance")]
    balance: i64,
}

impl From<&AssigneeBalance> for BalanceRow {
    fn from(b: &AssigneeBalance) -> Self {
        Self {
            assignee_id: b.assignee_id.to_string(),
            balance: b.balance,
        }
    }
}

#[derive(Debug, Serialize)]
struct Amount {
    subject: String,
    amount: i64,
}

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

fn print_amount(label: &str, subject: String, amount: i64, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            output::print_detail(label, &subject);
            output::print_detail("Amount", &amount.to_string());
            Ok(())
        }
        _ => output::print_item(&Amount { subject, amount }, format),
    }
}

pub async fn execute(cmd: LedgerCommands, app: &App, format: OutputFormat) -> Result<()> {
    match cmd {
        LedgerCommands::Balance { assignee_id } => {
            let balance = app.ledger.get_balance(AssigneeId(assignee_id)).await?;
            print_amount("Assignee", assignee_id.to_string(), balance, format)?;
        }

        LedgerCommands::Audit { assignee_id } => {
            let records = app.ledger.get_audit_log(AssigneeId(assignee_id)).await?;
            let rows: Vec<AuditRow> = records.iter().map(AuditRow::from).collect();
            output::print_list(&rows, format)?;
        }

        LedgerCommands::Income { day } => {
            let day = day.unwrap_or_else(today);
            let income = app.ledger.management_income_on(day).await?;
            print_amount("Day", day.to_string(), income, format)?;
        }

        LedgerCommands::Daily { day } => {
            let day = day.unwrap_or_else(today);
            let balances = app.ledger.daily_balances_on(day).await?;
            let rows: Vec<BalanceRow> = balances.iter().map(BalanceRow::from).collect();
            output::print_list(&rows, format)?;
        }
    }

    Ok(())
}

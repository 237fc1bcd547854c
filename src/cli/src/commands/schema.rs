//! Schema registry commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use popug_core::events::Envelope;
use popug_core::schema::SchemaRegistry;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum SchemaCommands {
    /// Validate an event envelope file (JSON or YAML) against the registry
    Validate {
        /// Path to the envelope file
        file: String,
    },

    /// List registered schemas
    List,
}

#[derive(Debug, Serialize, Tabled)]
struct SchemaRow {
    #[tabled(rename = "Schema")]
    schema_type: String,
    #[tabled(rename = "Version")]
    version: u32,
}

fn read_envelope(path: &str) -> Result<Envelope> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read envelope file: {}", path))?;
    if path.ends_with(".yaml") || path.ends_with(".yml") {
        serde_yaml::from_str(&content).with_context(|| "Failed to parse envelope YAML")
    } else {
        serde_json::from_str(&content).with_context(|| "Failed to parse envelope JSON")
    }
}

pub fn execute(cmd: SchemaCommands, format: OutputFormat) -> Result<()> {
    let registry = SchemaRegistry::builtin()?;

    match cmd {
        SchemaCommands::Validate { file } => {
            let envelope = read_envelope(&file)?;
            registry.validate_envelope(&envelope)?;

            match envelope.version {
                Some(version) => {
                    output::print_success(&format!("{} v{} is valid", envelope.name, version))
                }
                None => output::print_info(&format!(
                    "{} carries no version and is accepted without validation",
                    envelope.name
                )),
            }
        }

        SchemaCommands::List => {
            let rows: Vec<SchemaRow> = registry
                .entries()
                .into_iter()
                .map(|(schema_type, version)| SchemaRow { schema_type, version })
                .collect();
            output::print_list(&rows, format)?;
        }
    }

    Ok(())
}

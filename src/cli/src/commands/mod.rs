//! Subcommand implementations.

pub mod ledger;
pub mod schema;
pub mod task;
pub mod user;

use anyhow::Result;
use popug_core::app::App;

use crate::output;

/// Publish whatever the last operation left in the outbox.
///
/// The server's relay would pick the rows up anyway; flushing here makes the
/// events visible as soon as the command returns.
pub(crate) async fn flush_outbox(app: &App) -> Result<()> {
    let pass = app.relay().relay_once().await?;
    if pass.failed {
        output::print_info("Some events could not be published yet; the relay will retry them");
    }
    Ok(())
}

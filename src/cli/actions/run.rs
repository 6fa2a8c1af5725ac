use crate::cli::actions::{Action, purge, server};
use anyhow::Result;

/// Execute the provided action.
// Single dispatch point: every `Action::*` variant maps to its `*::execute`.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
        Action::Purge(args) => purge::execute(args).await,
    }
}

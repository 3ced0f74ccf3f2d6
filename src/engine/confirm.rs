//! Operator approval for confirm-mode trades

use async_trait::async_trait;
use std::io::{BufRead, Write};
use tracing::warn;

use super::types::PreviewResult;

/// Asks someone whether a previewed trade should go ahead
///
/// This is the one deliberate blocking point of the engine. Unattended runs
/// must not use confirm mode.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, preview: &PreviewResult) -> bool;
}

/// Prints the preview to stdout and reads y/N from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, preview: &PreviewResult) -> bool {
        let rendered = preview.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout();
            let _ = write!(stdout, "{}\nExecute this trade? [y/N] ", rendered);
            let _ = stdout.flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Ok(Err(e)) => {
                warn!("Could not read confirmation: {}", e);
                false
            }
            Err(e) => {
                warn!("Confirmation task failed: {}", e);
                false
            }
        }
    }
}

/// Approves everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl Confirmer for AutoApprove {
    async fn confirm(&self, _preview: &PreviewResult) -> bool {
        true
    }
}

/// Declines everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDecline;

#[async_trait]
impl Confirmer for AutoDecline {
    async fn confirm(&self, _preview: &PreviewResult) -> bool {
        false
    }
}

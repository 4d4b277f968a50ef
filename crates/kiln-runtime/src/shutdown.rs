//! Process lifecycle wiring: every long-running service in this corpus
//! installs a shutdown-signal handler that tears resources down
//! before the process exits, rather than leaving disposal to `Drop`. This
//! mirrors that shape for a [`RunResult`], one call site instead of
//! reproducing the `ctrl_c` + `dispose` boilerplate per binary.

use std::sync::Arc;

use crate::RunResult;

/// Awaits a shutdown signal (SIGINT/Ctrl-C), then disposes `run_result`'s
/// resources in reverse init order and returns whatever [`RunResult::dispose`]
/// returns. Intended as the last thing a binary's `main` awaits.
///
/// # Errors
/// Returns whatever [`RunResult::dispose`] returns, or
/// [`kiln_error::KilnError::PlatformUnsupportedFunction`] if no signal
/// handler could be installed.
pub async fn run_until_shutdown(run_result: Arc<RunResult>) -> Result<(), kiln_error::KilnError> {
    crate::platform::on_shutdown_signal().await?;
    tracing::info!("shutdown signal received, disposing resources");
    run_result.dispose().await
}

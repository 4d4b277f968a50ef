//! The environment abstraction. Non-goal excludes a
//! full cross-platform OS abstraction; this is the thin, directly-usable
//! surface the rest of the runtime actually consumes — `getEnv`, a shutdown
//! signal, `exit`, and the two timer primitives — each a direct wrapper over
//! its `std`/`tokio` equivalent rather than a trait object a real
//! multi-target platform crate would need.

use std::time::Duration;

use kiln_error::KilnError;

/// Reads an environment variable.
///
/// # Errors
/// Returns [`KilnError::PlatformUnsupportedFunction`] if `key` is unset or
/// not valid UTF-8.
pub fn get_env(key: &str) -> Result<String, KilnError> {
    std::env::var(key).map_err(|_| KilnError::PlatformUnsupportedFunction {
        function: format!("getEnv(\"{key}\")"),
    })
}

/// Resolves when the process receives SIGINT (or, on Windows, Ctrl-C).
///
/// # Errors
/// Returns [`KilnError::PlatformUnsupportedFunction`] if the platform has no
/// signal handler to install (`tokio::signal::ctrl_c` itself failed).
pub async fn on_shutdown_signal() -> Result<(), KilnError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|_| KilnError::PlatformUnsupportedFunction {
            function: "onShutdownSignal".to_string(),
        })
}

/// Terminates the process with `code`. Never returns.
pub fn exit(code: i32) -> ! {
    std::process::exit(code);
}

/// Resolves after `duration`, mirroring `setTimeout`.
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Races `fut` against `duration`, mirroring a `setTimeout`-cancelled await.
///
/// # Errors
/// Returns [`KilnError::Cancellation`] if `duration` elapses first.
pub async fn timeout<F: std::future::Future>(duration: Duration, fut: F) -> Result<F::Output, KilnError> {
    tokio::time::timeout(duration, fut).await.map_err(|_| KilnError::Cancellation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_elapses_into_cancellation() {
        let err = timeout(Duration::from_millis(1), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::Cancellation));
    }

    #[test]
    fn missing_env_var_is_platform_unsupported() {
        let err = get_env("KILN_RUNTIME_TEST_VAR_DOES_NOT_EXIST").unwrap_err();
        assert!(matches!(err, KilnError::PlatformUnsupportedFunction { .. }));
    }
}

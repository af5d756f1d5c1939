//! Operating system shutdown after the queue drains.

use tracing::{info, warn};

use crate::error::PowerError;

/// Grace period before the machine powers off.
pub const SHUTDOWN_DELAY_SECS: u32 = 60;

/// True where [`schedule_system_shutdown`] can work.
pub fn is_supported() -> bool {
    cfg!(windows)
}

/// Asks the OS to power off after [`SHUTDOWN_DELAY_SECS`].
pub fn schedule_system_shutdown() -> Result<(), PowerError> {
    if !is_supported() {
        warn!("Automatic shutdown requested on an unsupported platform");
        return Err(PowerError::Unsupported);
    }

    let delay = SHUTDOWN_DELAY_SECS.to_string();
    let status = std::process::Command::new("shutdown")
        .args([
            "/s",
            "/t",
            delay.as_str(),
            "/c",
            "All conversions finished. Shutting down.",
        ])
        .status()
        .map_err(|e| PowerError::CommandFailed(e.to_string()))?;

    if !status.success() {
        return Err(PowerError::CommandFailed(format!("exit status {status}")));
    }

    info!(delay_secs = SHUTDOWN_DELAY_SECS, "System shutdown scheduled");
    Ok(())
}

/// History line recorded when the shutdown could not be scheduled.
pub fn failure_note(error: &PowerError) -> String {
    match error {
        PowerError::Unsupported => "Auto-shutdown aborted: unsupported platform.".to_string(),
        PowerError::CommandFailed(message) => {
            format!("Auto-shutdown failed: {message}. The machine will stay on.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_note_names_the_cause() {
        assert_eq!(
            failure_note(&PowerError::Unsupported),
            "Auto-shutdown aborted: unsupported platform."
        );
        let note = failure_note(&PowerError::CommandFailed("exit status 1190".to_string()));
        assert_eq!(note, "Auto-shutdown failed: exit status 1190. The machine will stay on.");
        assert!(!note.contains("unsupported"));
    }

    #[cfg(not(windows))]
    #[test]
    fn unsupported_off_windows() {
        assert!(!is_supported());
        assert!(matches!(schedule_system_shutdown(), Err(PowerError::Unsupported)));
    }
}

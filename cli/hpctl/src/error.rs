//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("API error: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
        retryable: bool,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn api(
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: Option<String>,
        retryable: bool,
    ) -> Self {
        Self::Api {
            status,
            code: code.into(),
            message: message.into(),
            request_id,
            retryable,
        }
    }

    /// Machine-readable error code, when the controller sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            CliError::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let Some(cli_err) = err.downcast_ref::<CliError>() else {
        return;
    };

    if let Some(hint) = hint(cli_err) {
        eprintln!("\n{}", hint.yellow());
    }
    if let CliError::Api {
        request_id: Some(request_id),
        ..
    } = cli_err
    {
        eprintln!("\nRequest ID: {}", request_id);
    }
}

fn hint(err: &CliError) -> Option<&'static str> {
    match err {
        CliError::Api { code, .. } if code == "agent_busy" => {
            Some("Hint: complete the agent's jobs before deregistering or resizing it.")
        }
        CliError::Api { code, .. } if code == "offset_conflict" => {
            Some("Hint: run `hpctl agents list` to see which ranges are already taken.")
        }
        CliError::Api { retryable: true, .. } => {
            Some("Hint: the controller is restarting or overloaded; retry shortly.")
        }
        CliError::Network(_) => {
            Some("Hint: check that the controller is running and --api-url points at it.")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints_follow_error_code() {
        let busy = CliError::api(409, "agent_busy", "busy", None, false);
        assert!(hint(&busy).unwrap().contains("complete"));

        let unavailable = CliError::api(503, "engine_unavailable", "down", None, true);
        assert!(hint(&unavailable).unwrap().contains("retry"));

        let unknown = CliError::api(404, "unknown_job", "nope", None, false);
        assert!(hint(&unknown).is_none());
        assert_eq!(unknown.code(), Some("unknown_job"));
    }
}

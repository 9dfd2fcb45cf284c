// Error types for ridewatch

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum RidewatchError {
    // Session resolution
    #[snafu(display("No active session found for rider {rider_id}"))]
    SessionNotFound { rider_id: String },

    // Live data errors, all recoverable
    #[snafu(display("Could not fetch {kind} snapshot: {reason}"))]
    FetchFailed { kind: String, reason: String },
    #[snafu(display("Could not subscribe to {channel}: {reason}"))]
    SubscriptionFailed { channel: String, reason: String },
    #[snafu(display("Could not send {command} command for rider {rider_id}: {reason}"))]
    CommandFailed {
        command: String,
        rider_id: String,
        reason: String,
    },
    #[snafu(display("A stop command was already issued for rider {rider_id}"))]
    StopAlreadyIssued { rider_id: String },
    #[snafu(display("The live view for rider {rider_id} is closed"))]
    ViewClosed { rider_id: String },
    #[snafu(display("Could not encode command row"))]
    CommandEncode { source: serde_json::Error },

    // Boundary validation of backend rows
    #[snafu(display("Malformed {table} row: {reason}"))]
    MalformedRow { table: String, reason: String },

    // Backend transport
    #[snafu(display("Backend request {operation} failed: {reason}"))]
    BackendRequest { operation: String, reason: String },
    #[snafu(display("Could not start backend runtime"))]
    BackendRuntime { source: io::Error },
    #[snafu(display("No backend URL configured, set SUPABASE_URL or the config file"))]
    MissingBackendUrl,

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error accessing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // UI errors
    #[snafu(display("Could not start the UI: {reason}"))]
    UiStart { reason: String },

    // User input
    #[snafu(display("Invalid score file: {path}"))]
    InvalidScoreFile { path: String },
}

impl RidewatchError {
    pub(crate) fn backend(operation: &str, reason: impl ToString) -> Self {
        RidewatchError::BackendRequest {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(table: &str, reason: impl ToString) -> Self {
        RidewatchError::MalformedRow {
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }
}

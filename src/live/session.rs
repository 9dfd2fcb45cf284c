use log::{debug, info};

use crate::{
    RidewatchError,
    backend::{Backend, Query},
    config::TableNames,
    records::{RIDER_COLUMN, UPLOADED_AT_COLUMN, upload_session_id},
};

/// The rider being watched and the data-collection run the view is bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub rider_id: String,
    pub session_id: String,
    pub rider_label: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionState {
    Resolving,
    Ready(Session),
    /// The rider has no uploads at all
    NotFound,
    /// Resolution failed and the session stays unknown
    Failed(String),
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Ready(session) => Some(session),
            _ => None,
        }
    }
}

/// Most recent session id of `rider_id`, by upload time.
pub fn resolve_session(
    backend: &dyn Backend,
    tables: &TableNames,
    rider_id: &str,
) -> Result<Option<String>, RidewatchError> {
    let query = Query::new(&tables.uploads)
        .eq(RIDER_COLUMN, rider_id)
        .order_by(UPLOADED_AT_COLUMN, true)
        .limit(Some(1));
    let rows = backend.query(&query)?;

    match rows.first() {
        Some(row) => {
            let session_id = upload_session_id(row, tables)?;
            info!("Rider {rider_id} resolved to session {session_id}");
            Ok(Some(session_id))
        }
        None => {
            debug!("No uploads found for rider {rider_id}");
            Ok(None)
        }
    }
}

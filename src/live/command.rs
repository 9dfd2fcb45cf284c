use std::time::{Duration, Instant};

use log::{error, info};

use crate::{RidewatchError, records::CommandRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandState {
    Active,
    /// A stop is being written
    Stopping,
    /// The stop was written; the view leaves at `navigate_at`
    Stopped { navigate_at: Instant },
}

/// Issues the stop command for one rider, at most once.
#[derive(Debug)]
pub struct CommandDispatcher {
    rider_id: String,
    state: CommandState,
    redirect_delay: Duration,
}

impl CommandDispatcher {
    pub fn new(rider_id: &str, redirect_delay: Duration) -> Self {
        Self {
            rider_id: rider_id.to_string(),
            state: CommandState::Active,
            redirect_delay,
        }
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, CommandState::Stopped { .. })
    }

    pub fn can_stop(&self) -> bool {
        self.state == CommandState::Active
    }

    /// Moves to `Stopping` and hands back the record to write. Refused once a
    /// stop is in flight or done.
    pub fn begin_stop(&mut self) -> Result<CommandRecord, RidewatchError> {
        if !self.can_stop() {
            return Err(RidewatchError::StopAlreadyIssued {
                rider_id: self.rider_id.clone(),
            });
        }
        self.state = CommandState::Stopping;
        Ok(CommandRecord::stop(&self.rider_id))
    }

    /// Settles a stop started with [`Self::begin_stop`].
    pub fn finish_stop(
        &mut self,
        result: Result<(), RidewatchError>,
        now: Instant,
    ) -> Result<(), RidewatchError> {
        if self.state != CommandState::Stopping {
            return Ok(());
        }
        match result {
            Ok(()) => {
                info!("Stop command sent for rider {}", self.rider_id);
                self.state = CommandState::Stopped {
                    navigate_at: now + self.redirect_delay,
                };
                Ok(())
            }
            Err(e) => {
                error!("Stop command for rider {} failed: {e}", self.rider_id);
                self.state = CommandState::Active;
                Err(RidewatchError::CommandFailed {
                    command: "stop".to_string(),
                    rider_id: self.rider_id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    pub fn should_navigate(&self, now: Instant) -> bool {
        matches!(self.state, CommandState::Stopped { navigate_at } if now >= navigate_at)
    }
}

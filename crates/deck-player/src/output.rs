//! Native audio output seam.
//!
//! Every `load` carries a ticket; events produced while that file plays are
//! tagged with it so the engine can drop events belonging to an earlier load.

use async_trait::async_trait;
use thiserror::Error;

pub type Ticket = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    TimeChanged { ticket: Ticket, position: f64 },
    DurationChanged { ticket: Ticket, duration: f64 },
    Ended { ticket: Ticket },
    Failed { ticket: Ticket, reason: String },
}

impl OutputEvent {
    pub fn ticket(&self) -> Ticket {
        match self {
            OutputEvent::TimeChanged { ticket, .. }
            | OutputEvent::DurationChanged { ticket, .. }
            | OutputEvent::Ended { ticket }
            | OutputEvent::Failed { ticket, .. } => *ticket,
        }
    }
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("audio output unavailable: {0}")]
    Unavailable(String),
    #[error("audio output command failed: {0}")]
    Command(String),
}

#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn load(&self, url: &str, ticket: Ticket) -> Result<(), OutputError>;
    async fn set_pause(&self, paused: bool) -> Result<(), OutputError>;
    /// Absolute position in seconds.
    async fn seek(&self, position: f64) -> Result<(), OutputError>;
    async fn stop(&self) -> Result<(), OutputError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket() {
        assert_eq!(OutputEvent::Ended { ticket: 3 }.ticket(), 3);
        assert_eq!(
            OutputEvent::Failed {
                ticket: 7,
                reason: "loading failed".into()
            }
            .ticket(),
            7
        );
    }
}

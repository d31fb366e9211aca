use thiserror::Error;

use crate::store::StoreError;
use crate::titles::TitleError;

pub mod action;
pub mod keys;
pub mod manager;
pub mod registry;
pub mod worker;

#[cfg(test)]
mod tests;

pub mod prelude {
    pub use crate::karma::action::{ActionKind, KarmaAction, UserId};
    pub use crate::karma::keys::{Counter, DateRange};
    pub use crate::karma::manager::{KarmaManager, LeaderboardEntry};
    pub use crate::karma::registry::ActionRegistry;
    pub use crate::karma::worker::{ActionSender, ActionWorker, WorkerReport};
    pub use crate::karma::{KarmaError, KarmaResult};
}

pub use prelude::*;

pub type KarmaResult<T> = core::result::Result<T, KarmaError>;

#[derive(Debug, Error)]
pub enum KarmaError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Title(#[from] TitleError),

    #[error("unknown karma action '{0}'")]
    UnknownAction(String),

    #[error("unknown date range '{0}' (expected one of: all, 1y, 1m, 1w)")]
    UnknownRange(String),

    #[error("unknown counter '{0}' (expected 'points' or an action name)")]
    UnknownCounter(String),

    #[error("action '{0}' is not registered with this manager")]
    UnregisteredAction(ActionKind),

    #[error("action worker has shut down")]
    WorkerClosed,
}

use snafu::{Location, Snafu};

use crate::repl::ReplError;
use crate::service::queue::QueueError;
use crate::store::StoreError;
use crate::Located;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ApplicationError {
    /// could not read the configuration from the environment
    ConfigLoad {
        source: envy::Error,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not initialize the logger
    InitializeLogger {
        source: tracing::subscriber::SetGlobalDefaultError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not open the planner file
    OpenStore {
        source: StoreError,
        #[snafu(implicit)]
        location: Location,
    },

    /// Could not open the reminder journal
    OpenQueue {
        source: QueueError,
        #[snafu(implicit)]
        location: Location,
    },

    /// The interactive prompt failed
    Repl {
        source: ReplError,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for ApplicationError {
    fn location(&self) -> Location {
        match self {
            ApplicationError::ConfigLoad { location, .. }
            | ApplicationError::InitializeLogger { location, .. }
            | ApplicationError::OpenStore { location, .. }
            | ApplicationError::OpenQueue { location, .. }
            | ApplicationError::Repl { location, .. } => *location,
        }
    }
}

use std::io;

use thiserror::Error;

use crate::{runtime::conf::ConfError, source::SourceError};

/// Errors that stop the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Conf(#[from] ConfError),

    #[error("no input capture given, set --input or 'input' in the config file")]
    NoInput,

    #[error("packet source failed: {0}")]
    Source(#[from] SourceError),

    #[error("failed to spawn thread {name}: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("thread {name} panicked")]
    ThreadPanic { name: String },
}

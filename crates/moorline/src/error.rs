use thiserror::Error;

use crate::config::ConfigError;
use crate::exchange::ExchangeError;
use crate::store::StoreError;
use moorline_core::CoreError;

pub use moorline_core::Transience;

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over canonical capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Core(e) => e.transience(),
            Error::Exchange(e) => e.transience(),
            Error::Store(e) => e.transience(),
            Error::Config(e) => e.transience(),
        }
    }
}

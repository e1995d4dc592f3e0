use thiserror::Error;

/// Engine-wide error kinds. Everything fallible at the API boundary returns
/// one of these; the solver inner loops never error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An arena is full; capacities are fixed at world construction.
    #[error("arena capacity exceeded")]
    CapacityExceeded,

    /// A handle refers to a freed record, or its generation is out of date.
    #[error("stale handle")]
    StaleHandle,

    /// A caller-supplied value is out of contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

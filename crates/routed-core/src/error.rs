//! Error taxonomy for the routing and rollup core.

use crate::Rank;
use crate::bitmap::BitmapError;
use thiserror::Error;

/// Errors surfaced by routing modules, the rollup coordinator and the
/// wire records they exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutedError {
    /// Invalid argument, e.g. `Rank::INVALID` where a concrete rank is required.
    #[error("Bad parameter: {0}")]
    BadParam(String),

    /// Bitmap operation beyond capacity on a non-growing call.
    #[error("Bit {bit} out of range (capacity {capacity})")]
    OutOfRange { bit: usize, capacity: usize },

    /// Bitwise operation between differently-sized bitmaps.
    #[error("Bitmap size mismatch: {left} vs {right} bits")]
    SizeMismatch { left: usize, right: usize },

    /// No daemon hosts the requested rank.
    #[error("No route to rank {0}")]
    NotFound(Rank),

    /// Unrecoverable condition, surfaced to process shutdown logic.
    #[error("Fatal: {0}")]
    Fatal(String),

    /// The same rank reported twice in one phase.
    #[error("Duplicate report from rank {0}")]
    Duplicate(Rank),

    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    /// A wire record could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),
}

impl RoutedError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RoutedError::Fatal(_))
    }

    pub(crate) fn bad_rank(what: &str, rank: Rank) -> Self {
        RoutedError::BadParam(format!("{} must be a concrete rank, got {}", what, rank))
    }
}

impl From<BitmapError> for RoutedError {
    fn from(err: BitmapError) -> Self {
        match err {
            BitmapError::OutOfRange { bit, capacity } => RoutedError::OutOfRange { bit, capacity },
            BitmapError::CeilingExceeded { bit, max } => {
                RoutedError::OutOfRange { bit, capacity: max }
            }
            BitmapError::SizeMismatch { left, right } => RoutedError::SizeMismatch { left, right },
            BitmapError::CeilingLocked => {
                RoutedError::ResourceBusy("bitmap ceiling is fixed once a bit is set".into())
            }
        }
    }
}

impl From<bincode::Error> for RoutedError {
    fn from(err: bincode::Error) -> Self {
        RoutedError::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RoutedError>;

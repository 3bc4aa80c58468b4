//! Error types shared across handlers and the connection surface.

use thiserror::Error;

use crate::pending::PendingError;
use crate::store::StoreError;
use crate::util::BINDHOST_ATTEMPTS;

/// Errors raised while processing a dispatched event.
///
/// These are caught at the dispatch boundary: logged with the handler's
/// identity, mirrored to the operational log channel, and never allowed
/// to take down the connection or other handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Pending(#[from] PendingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The allocator tried a bounded number of draws from the address
    /// pool and every one collided.
    #[error("bindhost pool exhausted after {BINDHOST_ATTEMPTS} draws")]
    BindHostExhausted,
}

/// Result type for event and command handlers.
pub type HandlerResult = Result<(), HandlerError>;

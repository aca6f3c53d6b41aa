//! Error taxonomy for the back-office core.
//!
//! I/O-bound operations surface failures to their caller; there is no
//! internal retry/backoff. The UI presents errors immediately and lets the
//! user re-trigger the action.

use crate::status::OrderStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operation referenced a record that does not exist.
    #[error("{table} record not found: {id}")]
    NotFound { table: String, id: String },

    /// The record store reported a failure (transient or permanent).
    #[error("remote write failed: {0}")]
    RemoteWriteFailed(String),

    /// A change-feed payload or stored record was missing expected fields.
    #[error("malformed record payload: {0}")]
    MalformedEvent(String),

    /// The requested status change is not on the order lifecycle graph.
    #[error("invalid order transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}

impl Error {
    pub fn not_found(table: &str, id: &str) -> Self {
        Error::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_record() {
        let err = Error::not_found("orders", "ord-9");
        assert_eq!(err.to_string(), "orders record not found: ord-9");

        let err = Error::InvalidTransition {
            from: OrderStatus::Delivered,
            to: OrderStatus::Processing,
        };
        assert_eq!(
            err.to_string(),
            "invalid order transition: delivered -> processing"
        );
    }
}

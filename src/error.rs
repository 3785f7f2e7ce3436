use http::StatusCode;
use uuid::Uuid;

/// Failures surfaced by the credential exchange.
///
/// Network and API failures bubble up to the caller as one of these variants. Malformed
/// disclosures are not errors, see [DisclosureWarning](crate::core::disclosure::DisclosureWarning).
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// No bearer token has been acquired yet.
    #[error("no bearer token is available yet")]
    AuthUnavailable,

    /// The token endpoint rejected the credentials, or a request was still
    /// unauthorized after a token refresh.
    #[error("authentication failed: {reason}")]
    AuthFailed { reason: String },

    /// The remote API answered with a non-success status other than 401.
    #[error("remote request failed (status: {status}): {body}")]
    RemoteRequestFailed { status: StatusCode, body: String },

    /// The transaction id was never created by this store.
    #[error("unknown transaction: {0}")]
    UnknownTransaction(Uuid),

    /// The transaction already carries a remote session token.
    #[error("transaction {0} is already bound to a remote session")]
    AlreadyBound(Uuid),

    /// Polling has already been started for the transaction.
    #[error("status polling was already started for transaction {0}")]
    PollerAlreadyStarted(Uuid),

    /// The remote API answered with a body of unexpected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be built or delivered.
    #[error("transport error: {0:#}")]
    Transport(#[from] anyhow::Error),
}

impl ExchangeError {
    pub(crate) fn auth_failed(reason: impl ToString) -> Self {
        Self::AuthFailed {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_response(e: impl ToString) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}

use thiserror::Error;

/// Domain error taxonomy. The HTTP layer maps these onto status codes;
/// background jobs log and continue.
#[derive(Debug, Error)]
pub enum ClinicError {
    #[error("appointment not found")]
    NotFound,

    #[error("appointment is no longer available")]
    NotAvailable,

    #[error("user is not registered")]
    UserNotRegistered,

    #[error("appointments with Dr. {doctor} in this time slot are reserved; please pick a different hour")]
    AdmissionDenied { doctor: String },

    #[error("appointment has already been finalized")]
    InvalidTransition,

    #[error("{0}")]
    Validation(String),

    #[error("no message templates configured for category '{0}'")]
    EmptyCategory(String),

    #[error("message pool exhausted for this appointment")]
    ExhaustedPool,

    #[error("user has no linked notification channel")]
    NotifyUnlinked,

    #[error("storage error: {0}")]
    Store(String),

    #[error("transient error: {0}")]
    Transient(String),
}

impl From<diesel::result::Error> for ClinicError {
    fn from(err: diesel::result::Error) -> Self {
        ClinicError::Store(err.to_string())
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for ClinicError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        ClinicError::Transient(err.to_string())
    }
}

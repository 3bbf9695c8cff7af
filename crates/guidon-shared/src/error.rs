use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Malformed hex in {0}")]
    MalformedHex(&'static str),

    #[error("Invalid verification key")]
    InvalidKey,

    #[error("Signature mismatch")]
    Mismatch,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ColorError {
    #[error("Color is required")]
    Empty,

    #[error("Invalid color: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Envelope JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Envelope base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Error, Debug)]
pub enum InteractionError {
    #[error("Interaction JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

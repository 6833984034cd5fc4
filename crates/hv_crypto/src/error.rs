use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Invalid secret: {0}")]
    InvalidInput(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

use crate::limits::MAX_CLIENT_NAME_LEN;
use crate::model::ClientName;

/// Reply sent before closing a connection whose first line is not a valid
/// handshake.
pub const INVALID_HANDSHAKE: &str = "Invalid authorization header";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    Malformed,
    NameTooLong(usize),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Malformed => write!(f, "expected `Name <client>`"),
            AuthError::NameTooLong(len) => {
                write!(f, "client name too long: {len} > {MAX_CLIENT_NAME_LEN}")
            }
        }
    }
}

impl std::error::Error for AuthError {}

/// Parse the `Name <client>` line a client sends first. The name is
/// claimed, not verified.
pub fn parse_handshake(line: &str) -> Result<ClientName, AuthError> {
    let mut parts = line.trim().split(' ');
    let (Some("Name"), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AuthError::Malformed);
    };
    if name.is_empty() {
        return Err(AuthError::Malformed);
    }
    if name.len() > MAX_CLIENT_NAME_LEN {
        return Err(AuthError::NameTooLong(name.len()));
    }
    Ok(ClientName::new(name))
}

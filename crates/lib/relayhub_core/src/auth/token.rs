//! Bearer token wire format.
//!
//! `kind$@$client_id$@$user_id$@$random_hex`. The embedded fields are a
//! claim only: a token means nothing until it matches the value stored for
//! the user it names.

use std::fmt;

use rand::RngCore;

/// Field separator shared by tokens and stored authorization domains.
pub const DELIMITER: &str = "$@$";

/// Random bytes in an access token's secret component.
const ACCESS_SECRET_BYTES: usize = 16;

/// Random bytes in a refresh token's secret component.
const REFRESH_SECRET_BYTES: usize = 32;

/// Random bytes in an authorization code.
const AUTH_CODE_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "access" => Some(Self::Access),
            "refresh" => Some(Self::Refresh),
            _ => None,
        }
    }
}

/// A structurally parsed bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub kind: TokenKind,
    pub client_id: String,
    pub user_id: String,
    secret: String,
}

impl BearerToken {
    /// Mint a fresh token with an unpredictable secret component.
    pub fn mint(kind: TokenKind, client_id: &str, user_id: &str) -> Self {
        let len = match kind {
            TokenKind::Access => ACCESS_SECRET_BYTES,
            TokenKind::Refresh => REFRESH_SECRET_BYTES,
        };
        Self {
            kind,
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            secret: random_hex(len),
        }
    }

    /// Split a token into its four fields. Purely structural; `None` if the
    /// shape is wrong.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(DELIMITER);
        let kind = TokenKind::parse(parts.next()?)?;
        let client_id = parts.next()?;
        let user_id = parts.next()?;
        let secret = parts.next()?;
        if parts.next().is_some() || client_id.is_empty() || user_id.is_empty() || secret.is_empty()
        {
            return None;
        }
        Some(Self {
            kind,
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            secret: secret.to_string(),
        })
    }
}

impl fmt::Display for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            self.kind.as_str(),
            self.client_id,
            self.user_id,
            self.secret
        )
    }
}

/// Generate a high-entropy authorization code (hex).
pub fn generate_authorization_code() -> String {
    random_hex(AUTH_CODE_BYTES)
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_token_has_wire_shape() {
        let token = BearerToken::mint(TokenKind::Access, "relay-client", "user-1").to_string();
        let parts: Vec<&str> = token.split("$@$").collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "access");
        assert_eq!(parts[1], "relay-client");
        assert_eq!(parts[2], "user-1");
        assert_eq!(parts[3].len(), 32);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn refresh_secret_is_longer() {
        let token = BearerToken::mint(TokenKind::Refresh, "c", "u").to_string();
        assert_eq!(token.rsplit("$@$").next().unwrap().len(), 64);
    }

    #[test]
    fn parse_reads_back_minted_fields() {
        let minted = BearerToken::mint(TokenKind::Refresh, "relay-client", "user-1");
        let parsed = BearerToken::parse(&minted.to_string()).unwrap();
        assert_eq!(parsed, minted);
    }

    #[test]
    fn parse_rejects_malformed_tokens() {
        assert!(BearerToken::parse("").is_none());
        assert!(BearerToken::parse("access$@$c$@$u").is_none());
        assert!(BearerToken::parse("admin$@$c$@$u$@$ff").is_none());
        assert!(BearerToken::parse("access$@$c$@$u$@$ff$@$extra").is_none());
        assert!(BearerToken::parse("access$@$$@$u$@$ff").is_none());
    }

    #[test]
    fn codes_are_unique() {
        let a = generate_authorization_code();
        let b = generate_authorization_code();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}

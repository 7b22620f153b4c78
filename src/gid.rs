use base64ct::{Base64UrlUnpadded, Encoding};
use miette::Diagnostic;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every id starts with a fixed-width type prefix, e.g. `permrv2`.
pub const PREFIX_LEN: usize = 7;

const TOKEN_BYTES: usize = 24;

#[derive(Debug, Error, Diagnostic)]
pub enum IdError {
    #[error("invalid id `{0}`")]
    #[diagnostic(
        code(warden::gid::invalid_id),
        help("ids are a 7 character lowercase alphanumeric prefix followed by a URL-safe token")
    )]
    InvalidId(String),

    #[error("invalid id prefix `{0}`")]
    #[diagnostic(code(warden::gid::invalid_prefix))]
    InvalidPrefix(String),
}

/// A stable identifier `<prefix><opaque>` where the prefix names the resource
/// type and the opaque part is a random URL-safe token.
///
/// The prefix-to-type mapping lives in the compiled policy; this codec only
/// enforces the shape of the id itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrefixedId(String);

impl PrefixedId {
    /// Generate a fresh id under the given prefix. Collisions over 24 random
    /// bytes are negligible, so callers treat this as total once the prefix
    /// is known-good.
    pub fn new(prefix: &str) -> Result<Self, IdError> {
        check_prefix(prefix)?;
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Ok(Self(format!(
            "{prefix}{}",
            Base64UrlUnpadded::encode_string(&bytes)
        )))
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.len() < PREFIX_LEN + 1 {
            return Err(IdError::InvalidId(s.to_string()));
        }
        check_prefix(&s[..PREFIX_LEN]).map_err(|_| IdError::InvalidId(s.to_string()))?;
        let opaque_ok = s[PREFIX_LEN..]
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !opaque_ok {
            return Err(IdError::InvalidId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn prefix(&self) -> &str {
        &self.0[..PREFIX_LEN]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PrefixedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PrefixedId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PrefixedId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PrefixedId> for String {
    fn from(value: PrefixedId) -> Self {
        value.0
    }
}

fn check_prefix(prefix: &str) -> Result<(), IdError> {
    let ok = prefix.len() == PREFIX_LEN
        && prefix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if !ok {
        return Err(IdError::InvalidPrefix(prefix.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_round_trips_through_parse() {
        for prefix in ["permrv2", "permrbn", "tnntten"] {
            let id = PrefixedId::new(prefix).unwrap();
            let parsed = PrefixedId::parse(id.as_str()).unwrap();
            assert_eq!(parsed.prefix(), prefix);
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn test_generated_ids_are_url_safe() {
        let id = PrefixedId::new("permrv2").unwrap();
        assert!(id
            .as_str()
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
        // 7 char prefix + 32 char base64url token
        assert_eq!(id.as_str().len(), 39);
    }

    #[test]
    fn test_parse_rejects_short_ids() {
        assert!(matches!(
            PrefixedId::parse("permrv2"),
            Err(IdError::InvalidId(_))
        ));
        assert!(matches!(PrefixedId::parse(""), Err(IdError::InvalidId(_))));
    }

    #[test]
    fn test_parse_rejects_bad_prefixes() {
        assert!(PrefixedId::parse("PERMRV2abcdef").is_err());
        assert!(PrefixedId::parse("perm!v2abcdef").is_err());
    }

    #[test]
    fn test_new_rejects_bad_prefixes() {
        assert!(matches!(
            PrefixedId::new("toolongprefix"),
            Err(IdError::InvalidPrefix(_))
        ));
        assert!(PrefixedId::new("short").is_err());
    }
}

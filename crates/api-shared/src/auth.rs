//! Bearer-token role authorisation.
//!
//! Tokens are configured at startup as `token:ROLE` pairs, e.g.
//! `JOURNAL_API_TOKENS="s3cret:DOCTOR,front-desk:STAFF"`. With no tokens configured every
//! request is let through.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Doctor,
    Staff,
    Patient,
}

impl Role {
    /// Roles allowed to read patient records.
    pub const PATIENT_READERS: &'static [Role] = &[Role::Doctor, Role::Staff, Role::Patient];
    /// Roles allowed to do anything else.
    pub const CLINICIANS: &'static [Role] = &[Role::Doctor, Role::Staff];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Doctor => "DOCTOR",
            Role::Staff => "STAFF",
            Role::Patient => "PATIENT",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DOCTOR" => Ok(Role::Doctor),
            "STAFF" => Ok(Role::Staff),
            "PATIENT" => Ok(Role::Patient),
            other => Err(AuthError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid bearer token")]
    InvalidToken,
    #[error("role {0} is not allowed to perform this operation")]
    Forbidden(Role),
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("malformed token entry {0:?}, expected token:ROLE")]
    MalformedEntry(String),
}

/// Configured bearer tokens and the role each one grants.
#[derive(Clone, Default)]
pub struct ApiTokens {
    tokens: HashMap<String, Role>,
}

impl fmt::Debug for ApiTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiTokens")
            .field("count", &self.tokens.len())
            .finish()
    }
}

impl ApiTokens {
    /// Parse a comma-separated `token:ROLE` list. `None` or a blank value disables auth.
    pub fn parse(value: Option<&str>) -> Result<Self, AuthError> {
        let mut tokens = HashMap::new();
        for entry in value
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
        {
            let (token, role) = entry
                .rsplit_once(':')
                .filter(|(token, _)| !token.trim().is_empty())
                .ok_or_else(|| AuthError::MalformedEntry(entry.to_string()))?;
            tokens.insert(token.trim().to_string(), role.parse()?);
        }
        Ok(Self { tokens })
    }

    pub fn with_token(mut self, token: impl Into<String>, role: Role) -> Self {
        self.tokens.insert(token.into(), role);
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Check an `Authorization` header value against `allowed`.
    ///
    /// Returns the caller's role, or `None` when authorisation is disabled.
    pub fn authorize(
        &self,
        authorization: Option<&str>,
        allowed: &[Role],
    ) -> Result<Option<Role>, AuthError> {
        if !self.is_enabled() {
            return Ok(None);
        }

        let token = authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let role = *self.tokens.get(token).ok_or(AuthError::InvalidToken)?;

        if allowed.contains(&role) {
            Ok(Some(role))
        } else {
            Err(AuthError::Forbidden(role))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_list() {
        let tokens = ApiTokens::parse(Some("doc-token:DOCTOR, desk:staff ,me:PATIENT")).unwrap();
        assert!(tokens.is_enabled());
        assert_eq!(
            tokens.authorize(Some("Bearer desk"), Role::CLINICIANS),
            Ok(Some(Role::Staff))
        );
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(matches!(
            ApiTokens::parse(Some("no-role")),
            Err(AuthError::MalformedEntry(_))
        ));
        assert!(matches!(
            ApiTokens::parse(Some("t:NURSE")),
            Err(AuthError::UnknownRole(_))
        ));
    }

    #[test]
    fn disabled_without_tokens() {
        let tokens = ApiTokens::parse(None).unwrap();
        assert!(!tokens.is_enabled());
        assert_eq!(tokens.authorize(None, Role::CLINICIANS), Ok(None));
    }

    #[test]
    fn enforces_roles() {
        let tokens = ApiTokens::default()
            .with_token("doc", Role::Doctor)
            .with_token("me", Role::Patient);

        assert_eq!(
            tokens.authorize(None, Role::CLINICIANS),
            Err(AuthError::MissingToken)
        );
        assert_eq!(
            tokens.authorize(Some("Bearer nope"), Role::CLINICIANS),
            Err(AuthError::InvalidToken)
        );
        assert_eq!(
            tokens.authorize(Some("Bearer me"), Role::CLINICIANS),
            Err(AuthError::Forbidden(Role::Patient))
        );
        assert_eq!(
            tokens.authorize(Some("Bearer me"), Role::PATIENT_READERS),
            Ok(Some(Role::Patient))
        );
    }
}

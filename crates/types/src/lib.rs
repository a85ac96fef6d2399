//! # Journal Types
//!
//! Validated primitive types shared by every crate in the workspace.
//!
//! Each type guarantees its invariant once constructed, so downstream code never has to
//! re-check for blank names, non-positive identifiers or malformed email addresses.

use std::fmt;
use std::str::FromStr;

/// Rejection of blank text.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    #[error("text cannot be blank")]
    Empty,
}

/// Errors that can occur when creating a [`RecordId`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    #[error("record id must be positive, got {0}")]
    NotPositive(i64),
    #[error("record id is not an integer: {0}")]
    NotANumber(String),
}

/// Errors that can occur when creating an [`EmailAddress`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EmailError {
    #[error("email address cannot be empty")]
    Empty,
    #[error("invalid email address: {0}")]
    Invalid(String),
}

/// Text with surrounding whitespace removed and at least one character left.
///
/// Used for names, personal numbers and clinical notes, none of which may be blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Trim `input` and reject it with [`TextError::Empty`] if nothing remains.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Store-assigned record identifier.
///
/// Identifiers are positive and sequential per record type. The string form is the
/// decimal value, which is also the partition key used on the channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(i64);

impl RecordId {
    pub fn new(value: i64) -> Result<Self, IdError> {
        if value <= 0 {
            return Err(IdError::NotPositive(value));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// The identifier that follows this one in a sequence, or `None` at `i64::MAX`.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// The first identifier handed out by a fresh sequence.
    pub const FIRST: RecordId = RecordId(1);
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| IdError::NotANumber(s.to_owned()))?;
        Self::new(value)
    }
}

impl TryFrom<i64> for RecordId {
    type Error = IdError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecordId> for i64 {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl serde::Serialize for RecordId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = i64::deserialize(deserializer)?;
        RecordId::new(value).map_err(serde::de::Error::custom)
    }
}

/// The natural identifier of a patient (Swedish personal identity number or similar).
///
/// Uniqueness across patients is enforced by the record store; this type only guarantees the
/// value is non-blank and free of surrounding whitespace, so two spellings that differ only in
/// padding compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PersonalNumber(NonEmptyText);

impl PersonalNumber {
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        NonEmptyText::new(input).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for PersonalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An email address with a minimal structural check (`local@domain.tld`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(input: impl AsRef<str>) -> Result<Self, EmailError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(EmailError::Empty);
        }

        let invalid = || EmailError::Invalid(trimmed.to_owned());
        let (local, domain) = trimmed.split_once('@').ok_or_else(invalid)?;
        if local.is_empty()
            || domain.contains('@')
            || !domain.contains('.')
            || domain.starts_with('.')
            || domain.ends_with('.')
            || trimmed.chars().any(char::is_whitespace)
        {
            return Err(invalid());
        }

        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for EmailAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for EmailAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EmailAddress::parse(&s).map_err(serde::de::Error::custom)
    }
}

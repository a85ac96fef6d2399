//! Wire format of the command channel.
//!
//! ```json
//! { "commandType": "UPDATE", "targetId": 1, "payload": { "firstName": "Anna", ... } }
//! ```
//!
//! The envelope is the loose, all-optional shape that travels over the channel. Decoding
//! validates the tag against the fields present and turns it into a typed [`Command`], so
//! nothing downstream has to re-check field combinations.

use journal_core::{Command, RecordId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed command envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown command type: {0:?}")]
    UnknownTag(String),
    #[error("{0} command requires a targetId")]
    MissingTargetId(CommandTag),
    #[error("{0} command must not carry a targetId")]
    UnexpectedTargetId(CommandTag),
    #[error("invalid targetId {0}: must be a positive integer")]
    InvalidTargetId(i64),
    #[error("{0} command requires a payload")]
    MissingPayload(CommandTag),
    #[error("{0} command must not carry a payload")]
    UnexpectedPayload(CommandTag),
    #[error("invalid {tag} payload: {source}")]
    InvalidPayload {
        tag: CommandTag,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    Create,
    Update,
    Delete,
}

impl CommandTag {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandTag::Create => "CREATE",
            CommandTag::Update => "UPDATE",
            CommandTag::Delete => "DELETE",
        }
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandTag {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(CommandTag::Create),
            "UPDATE" => Ok(CommandTag::Update),
            "DELETE" => Ok(CommandTag::Delete),
            _ => Err(EnvelopeError::UnknownTag(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command_type: String,
    #[serde(default, alias = "patientId", skip_serializing_if = "Option::is_none")]
    pub target_id: Option<i64>,
    #[serde(default, alias = "patient", skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl CommandEnvelope {
    pub fn from_command<D: Serialize>(command: &Command<D>) -> Result<Self, EnvelopeError> {
        let payload = command
            .data()
            .map(serde_json::to_value)
            .transpose()
            .map_err(EnvelopeError::Encode)?;
        Ok(Self {
            command_type: command.name().to_string(),
            target_id: command.target_id().map(RecordId::get),
            payload,
        })
    }

    pub fn tag(&self) -> Result<CommandTag, EnvelopeError> {
        self.command_type.parse()
    }

    /// Validate the field combination for the tag and decode the payload.
    pub fn into_command<D: DeserializeOwned>(self) -> Result<Command<D>, EnvelopeError> {
        let tag = self.tag()?;
        let target_id = |raw: i64| RecordId::new(raw).map_err(|_| EnvelopeError::InvalidTargetId(raw));
        let data = |value: serde_json::Value| {
            serde_json::from_value::<D>(value)
                .map_err(|source| EnvelopeError::InvalidPayload { tag, source })
        };

        match (tag, self.target_id, self.payload) {
            (CommandTag::Create, Some(_), _) => Err(EnvelopeError::UnexpectedTargetId(tag)),
            (CommandTag::Create, None, Some(value)) => Ok(Command::Create(data(value)?)),
            (CommandTag::Update | CommandTag::Delete, None, _) => {
                Err(EnvelopeError::MissingTargetId(tag))
            }
            (CommandTag::Update, Some(raw), Some(value)) => Ok(Command::Update {
                id: target_id(raw)?,
                data: data(value)?,
            }),
            (CommandTag::Delete, Some(_), Some(_)) => Err(EnvelopeError::UnexpectedPayload(tag)),
            (CommandTag::Delete, Some(raw), None) => Ok(Command::Delete { id: target_id(raw)? }),
            (CommandTag::Create | CommandTag::Update, _, None) => {
                Err(EnvelopeError::MissingPayload(tag))
            }
        }
    }
}

pub fn encode_command<D: Serialize>(command: &Command<D>) -> Result<Vec<u8>, EnvelopeError> {
    let envelope = CommandEnvelope::from_command(command)?;
    serde_json::to_vec(&envelope).map_err(EnvelopeError::Encode)
}

pub fn decode_command<D: DeserializeOwned>(bytes: &[u8]) -> Result<Command<D>, EnvelopeError> {
    let envelope: CommandEnvelope =
        serde_json::from_slice(bytes).map_err(EnvelopeError::Malformed)?;
    envelope.into_command()
}

#[cfg(test)]
mod tests {
    use super::*;
    use journal_core::PatientData;
    use serde_json::json;

    fn decode(value: serde_json::Value) -> Result<Command<PatientData>, EnvelopeError> {
        decode_command(&serde_json::to_vec(&value).unwrap())
    }

    fn anna() -> serde_json::Value {
        json!({
            "firstName": "Anna",
            "lastName": "Andersson",
            "naturalId": "19900101-1234"
        })
    }

    #[test]
    fn decodes_each_tag() {
        let create = decode(json!({ "commandType": "CREATE", "payload": anna() })).unwrap();
        assert!(matches!(create, Command::Create(ref data) if data.first_name.as_str() == "Anna"));

        let update =
            decode(json!({ "commandType": "update", "targetId": 1, "payload": anna() })).unwrap();
        assert_eq!(update.target_id().map(RecordId::get), Some(1));

        let delete = decode(json!({ "commandType": "Delete", "patientId": 999 })).unwrap();
        assert_eq!(delete, Command::Delete { id: RecordId::new(999).unwrap() });
    }

    #[test]
    fn accepts_legacy_field_names() {
        let command =
            decode(json!({ "commandType": "UPDATE", "patientId": 3, "patient": anna() })).unwrap();
        assert_eq!(command.target_id().map(RecordId::get), Some(3));
        assert!(command.data().is_some());
    }

    #[test]
    fn rejects_invalid_field_combinations() {
        assert!(matches!(
            decode(json!({ "commandType": "PATCH", "targetId": 1 })),
            Err(EnvelopeError::UnknownTag(tag)) if tag == "PATCH"
        ));
        assert!(matches!(
            decode(json!({ "commandType": "CREATE", "targetId": 1, "payload": anna() })),
            Err(EnvelopeError::UnexpectedTargetId(CommandTag::Create))
        ));
        assert!(matches!(
            decode(json!({ "commandType": "UPDATE", "payload": anna() })),
            Err(EnvelopeError::MissingTargetId(CommandTag::Update))
        ));
        assert!(matches!(
            decode(json!({ "commandType": "UPDATE", "targetId": 1 })),
            Err(EnvelopeError::MissingPayload(CommandTag::Update))
        ));
        assert!(matches!(
            decode(json!({ "commandType": "DELETE", "targetId": 1, "payload": anna() })),
            Err(EnvelopeError::UnexpectedPayload(CommandTag::Delete))
        ));
        assert!(matches!(
            decode(json!({ "commandType": "DELETE", "targetId": 0 })),
            Err(EnvelopeError::InvalidTargetId(0))
        ));
        assert!(matches!(
            decode(json!({ "commandType": "CREATE", "payload": { "firstName": "Anna" } })),
            Err(EnvelopeError::InvalidPayload { .. })
        ));
        assert!(matches!(
            decode_command::<PatientData>(b"not json"),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn encoded_delete_has_no_payload() {
        let bytes = encode_command::<PatientData>(&Command::Delete {
            id: RecordId::new(5).unwrap(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({ "commandType": "DELETE", "targetId": 5 }));
    }
}

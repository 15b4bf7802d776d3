//! Per-entity failure extraction from a validated [`Response`].

use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

use super::model::{InvalidResponseError, Response};
use crate::vendor::PayloadSchema;

/// Entity name allowed to omit its type. Records for it are skipped rather
/// than invalidating the whole payload.
pub const WORKSPACE_ADMIN_EXEMPTION: &str = "Workspace Admin";

/// Kind of business object a failure record points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityKind {
    Role,
    Group,
    Account,
    Workspace,
}

impl EntityKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "ROLE" => Some(EntityKind::Role),
            "GROUP" => Some(EntityKind::Group),
            "ACCOUNT" => Some(EntityKind::Account),
            "WORKSPACE" => Some(EntityKind::Workspace),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Role => write!(f, "ROLE"),
            EntityKind::Group => write!(f, "GROUP"),
            EntityKind::Account => write!(f, "ACCOUNT"),
            EntityKind::Workspace => write!(f, "WORKSPACE"),
        }
    }
}

/// Structural key: two records naming the same kind and name are one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub name: String,
}

impl Entity {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Blocks onboarding.
    #[default]
    Error,
    /// Reported but does not change the verdict.
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FormattedMessage {
    pub message: String,
    pub severity: Severity,
}

impl FormattedMessage {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

/// Entity → messages, in the order entities were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetails {
    entries: Vec<(Entity, Vec<FormattedMessage>)>,
}

impl ErrorDetails {
    /// Appends to the entity's list, creating the entry on first sight.
    pub fn push(&mut self, entity: Entity, message: FormattedMessage) {
        match self.entries.iter_mut().find(|(e, _)| *e == entity) {
            Some((_, messages)) => messages.push(message),
            None => self.entries.push((entity, vec![message])),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Entity, &[FormattedMessage])> {
        self.entries.iter().map(|(e, m)| (e, m.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when any message has [`Severity::Error`].
    pub fn has_blocking(&self) -> bool {
        self.entries
            .iter()
            .flat_map(|(_, messages)| messages)
            .any(|m| m.severity == Severity::Error)
    }
}

impl Serialize for ErrorDetails {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Entry<'a>(&'a Entity, &'a [FormattedMessage]);

        impl Serialize for Entry<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut state = serializer.serialize_struct("Entry", 2)?;
                state.serialize_field("entity", self.0)?;
                state.serialize_field("messages", self.1)?;
                state.end()
            }
        }

        serializer.collect_seq(self.entries.iter().map(|(e, m)| Entry(e, m)))
    }
}

/// Reads failure records out of a [`Response`].
pub struct ResponseAnalyser<'r, 'a> {
    response: &'r Response<'a>,
}

impl<'r, 'a> ResponseAnalyser<'r, 'a> {
    pub fn new(response: &'r Response<'a>) -> Self {
        Self { response }
    }

    /// Collects every failure record, grouped by entity in discovery order.
    pub fn errors(&self) -> Result<ErrorDetails, InvalidResponseError> {
        let schema = self.response.schema();
        let mut details = ErrorDetails::default();

        let records = match self.response.body().get(&schema.failures) {
            None | Some(Value::Null) => return Ok(details),
            Some(Value::Array(records)) => records,
            Some(other) => {
                return Err(InvalidResponseError::new(format!(
                    "'{}' must be an array, got {other}",
                    schema.failures
                )));
            }
        };

        for (index, record) in records.iter().enumerate() {
            let record = record.as_object().ok_or_else(|| {
                InvalidResponseError::new(format!("failure record #{index} is not an object"))
            })?;
            let Some(entity) = resolve_entity(record, schema, index)? else {
                continue;
            };
            let message = record
                .get(&schema.message)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    InvalidResponseError::new(format!(
                        "failure record #{index} has no string '{}'",
                        schema.message
                    ))
                })?;
            let severity = resolve_severity(record, schema, index)?;

            details.push(entity, FormattedMessage::new(message, severity));
        }

        Ok(details)
    }

    /// True when the payload reports no blocking failure. Warnings alone do
    /// not count against onboarding.
    pub fn is_all_roles_onboarded(&self) -> Result<bool, InvalidResponseError> {
        Ok(!self.errors()?.has_blocking())
    }
}

fn resolve_entity(
    record: &Map<String, Value>,
    schema: &PayloadSchema,
    index: usize,
) -> Result<Option<Entity>, InvalidResponseError> {
    let entity = record
        .get(&schema.entity)
        .and_then(Value::as_object)
        .ok_or_else(|| {
            InvalidResponseError::new(format!(
                "failure record #{index} has no '{}' object",
                schema.entity
            ))
        })?;

    let name = entity
        .get(&schema.entity_name)
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            InvalidResponseError::new(format!(
                "failure record #{index} entity has no '{}'",
                schema.entity_name
            ))
        })?;

    let kind = match entity.get(&schema.entity_type) {
        Some(Value::String(raw)) => EntityKind::parse(raw).ok_or_else(|| {
            InvalidResponseError::new(format!(
                "failure record #{index} has unknown entity type '{raw}'"
            ))
        })?,
        None if name == WORKSPACE_ADMIN_EXEMPTION => {
            warn!(
                record = index,
                name, "skipping failure record without entity type for exempt entity"
            );
            return Ok(None);
        }
        _ => {
            return Err(InvalidResponseError::new(format!(
                "failure record #{index} entity has no string '{}'",
                schema.entity_type
            )));
        }
    };

    Ok(Some(Entity::new(kind, name)))
}

fn resolve_severity(
    record: &Map<String, Value>,
    schema: &PayloadSchema,
    index: usize,
) -> Result<Severity, InvalidResponseError> {
    match record.get(&schema.severity) {
        None | Some(Value::Null) => Ok(Severity::Error),
        Some(Value::String(raw)) if raw.eq_ignore_ascii_case("ERROR") => Ok(Severity::Error),
        Some(Value::String(raw)) if raw.eq_ignore_ascii_case("WARNING") => Ok(Severity::Warning),
        Some(other) => Err(InvalidResponseError::new(format!(
            "failure record #{index} has unknown severity {other}"
        ))),
    }
}

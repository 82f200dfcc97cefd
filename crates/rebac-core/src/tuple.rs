use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TupleParseError {
    #[error("empty composite string")]
    Empty,
    #[error("'{0}' is missing the ':' between type and id")]
    MissingSeparator(String),
    #[error("'{0}' is missing the '#relation' suffix")]
    MissingRelation(String),
    #[error("'{input}' has an invalid {part}")]
    InvalidPart { input: String, part: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    /// Parses the legacy `"{type}:{id}"` object form.
    pub fn parse_composite(input: &str) -> Result<Self, TupleParseError> {
        let (object_type, object_id) = split_type_and_id(input, input)?;
        Ok(Self::new(object_type, object_id))
    }

    /// Checks a reference built from structured fields by the same rules
    /// the composite parser applies.
    pub fn validate(&self) -> Result<(), TupleParseError> {
        check_type_and_id(&self.object_type, &self.object_id, &self.to_string())
    }

    /// The same entity seen from the subject side of a tuple.
    pub fn as_subject(&self) -> SubjectRef {
        SubjectRef::new(&self.object_type, &self.object_id)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

impl FromStr for ObjectRef {
    type Err = TupleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_composite(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectRef {
    pub subject_type: String,
    pub subject_id: String,
}

impl SubjectRef {
    pub fn new(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
        }
    }

    /// Parses the legacy `"{type}:{id}#{relation}"` subject form into the
    /// subject and the relation it carries.
    pub fn parse_composite(input: &str) -> Result<(Self, String), TupleParseError> {
        if input.is_empty() {
            return Err(TupleParseError::Empty);
        }
        let mut parts = input.split('#');
        let entity = parts.next().unwrap_or_default();
        let relation = parts
            .next()
            .ok_or_else(|| TupleParseError::MissingRelation(input.to_string()))?;
        if parts.next().is_some() || !is_identifier(relation) {
            return Err(TupleParseError::InvalidPart {
                input: input.to_string(),
                part: "relation",
            });
        }

        let (subject_type, subject_id) = split_type_and_id(entity, input)?;
        Ok((Self::new(subject_type, subject_id), relation.to_string()))
    }

    pub fn validate(&self) -> Result<(), TupleParseError> {
        check_type_and_id(&self.subject_type, &self.subject_id, &self.to_string())
    }

    /// The same entity seen from the object side of a tuple.
    pub fn as_object(&self) -> ObjectRef {
        ObjectRef::new(&self.subject_type, &self.subject_id)
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.subject_id)
    }
}

impl FromStr for SubjectRef {
    type Err = TupleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (subject_type, subject_id) = split_type_and_id(s, s)?;
        Ok(Self::new(subject_type, subject_id))
    }
}

fn split_type_and_id<'a>(
    entity: &'a str,
    input: &str,
) -> Result<(&'a str, &'a str), TupleParseError> {
    if entity.is_empty() {
        return Err(TupleParseError::Empty);
    }
    let (entity_type, entity_id) = entity
        .split_once(':')
        .ok_or_else(|| TupleParseError::MissingSeparator(input.to_string()))?;
    check_type_and_id(entity_type, entity_id, input)?;
    Ok((entity_type, entity_id))
}

/// Types are identifiers; ids are non-empty and free of the composite
/// separators, so every entity has exactly one `type:id` rendering.
fn check_type_and_id(
    entity_type: &str,
    entity_id: &str,
    input: &str,
) -> Result<(), TupleParseError> {
    if !is_identifier(entity_type) {
        return Err(TupleParseError::InvalidPart {
            input: input.to_string(),
            part: "type",
        });
    }
    if entity_id.is_empty()
        || entity_id
            .chars()
            .any(|c| c == ':' || c == '#' || c.is_whitespace())
    {
        return Err(TupleParseError::InvalidPart {
            input: input.to_string(),
            part: "id",
        });
    }
    Ok(())
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationTuple {
    pub subject: SubjectRef,
    pub relation: String,
    pub object: ObjectRef,
}

impl RelationTuple {
    pub fn new(subject: SubjectRef, relation: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            subject,
            relation: relation.into(),
            object,
        }
    }

    /// Builds a tuple from the legacy composite columns.
    pub fn from_composite(subject: &str, object: &str) -> Result<Self, TupleParseError> {
        let (subject, relation) = SubjectRef::parse_composite(subject)?;
        let object = ObjectRef::parse_composite(object)?;
        Ok(Self::new(subject, relation, object))
    }

    pub fn composite_subject(&self) -> String {
        format!("{}#{}", self.subject, self.relation)
    }

    pub fn composite_object(&self) -> String {
        self.object.to_string()
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.subject, self.relation, self.object)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Owner,
    Editor,
    Reader,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Editor => "editor",
            Role::Reader => "reader",
        }
    }
}

impl FromStr for Role {
    type Err = TupleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "editor" => Ok(Role::Editor),
            "reader" => Ok(Role::Reader),
            _ => Err(TupleParseError::InvalidPart {
                input: s.to_string(),
                part: "role",
            }),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relation tuple whose relation is an access-control role on a single
/// resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionTuple {
    pub subject: SubjectRef,
    pub role: Role,
    pub object: ObjectRef,
}

impl PermissionTuple {
    pub fn new(subject: SubjectRef, role: Role, object: ObjectRef) -> Self {
        Self {
            subject,
            role,
            object,
        }
    }
}

impl From<PermissionTuple> for RelationTuple {
    fn from(tuple: PermissionTuple) -> Self {
        RelationTuple::new(tuple.subject, tuple.role.as_str(), tuple.object)
    }
}

impl TryFrom<RelationTuple> for PermissionTuple {
    type Error = TupleParseError;

    fn try_from(tuple: RelationTuple) -> Result<Self, Self::Error> {
        let role = tuple.relation.parse()?;
        Ok(Self::new(tuple.subject, role, tuple.object))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub relation: Option<String>,
    pub object_type: Option<String>,
    pub object_id: Option<String>,
}

impl TupleFilter {
    pub fn exact(tuple: &RelationTuple) -> Self {
        Self {
            subject_type: Some(tuple.subject.subject_type.clone()),
            subject_id: Some(tuple.subject.subject_id.clone()),
            relation: Some(tuple.relation.clone()),
            object_type: Some(tuple.object.object_type.clone()),
            object_id: Some(tuple.object.object_id.clone()),
        }
    }

    /// Tuples `(*, relation, object)`.
    pub fn subjects_of(relation: &str, object: &ObjectRef) -> Self {
        Self {
            relation: Some(relation.to_string()),
            object_type: Some(object.object_type.clone()),
            object_id: Some(object.object_id.clone()),
            ..Default::default()
        }
    }

    /// Tuples `(subject, relation, *)`.
    pub fn objects_of(subject: &SubjectRef, relation: &str) -> Self {
        Self {
            subject_type: Some(subject.subject_type.clone()),
            subject_id: Some(subject.subject_id.clone()),
            relation: Some(relation.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, tuple: &RelationTuple) -> bool {
        if let Some(ref st) = self.subject_type
            && st != &tuple.subject.subject_type
        {
            return false;
        }
        if let Some(ref si) = self.subject_id
            && si != &tuple.subject.subject_id
        {
            return false;
        }
        if let Some(ref r) = self.relation
            && r != &tuple.relation
        {
            return false;
        }
        if let Some(ref ot) = self.object_type
            && ot != &tuple.object.object_type
        {
            return false;
        }
        if let Some(ref oi) = self.object_id
            && oi != &tuple.object.object_id
        {
            return false;
        }
        true
    }
}

use std::fmt;
use std::str::FromStr;

use crate::tuple::is_identifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedSubject {
    Any,
    Type(String),
}

impl AllowedSubject {
    pub fn admits(&self, subject_type: &str) -> bool {
        match self {
            AllowedSubject::Any => true,
            AllowedSubject::Type(t) => t == subject_type,
        }
    }
}

impl fmt::Display for AllowedSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowedSubject::Any => f.write_str("*"),
            AllowedSubject::Type(t) => f.write_str(t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub name: String,
    pub subject_types: Vec<AllowedSubject>,
}

impl RelationDef {
    pub fn new(name: impl Into<String>, subject_types: Vec<AllowedSubject>) -> Self {
        Self {
            name: name.into(),
            subject_types,
        }
    }

    /// A relation that admits any subject type.
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, vec![AllowedSubject::Any])
    }

    pub fn allows(&self, subject_type: &str) -> bool {
        self.subject_types.iter().any(|s| s.admits(subject_type))
    }
}

/// One member of an action's union.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// The subject holds the relation on the resource.
    Direct(String),
    /// `via->target`: the subject holds `via` on some entity `E`, and `E`
    /// holds `target` (a relation or an action) on the resource.
    Indirect(String, String),
}

impl Term {
    pub fn direct(relation: impl Into<String>) -> Self {
        Term::Direct(relation.into())
    }

    pub fn indirect(via: impl Into<String>, target: impl Into<String>) -> Self {
        Term::Indirect(via.into(), target.into())
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Direct(r) => f.write_str(r),
            Term::Indirect(via, target) => write!(f, "{via}->{target}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid term '{0}'")]
pub struct InvalidTerm(pub String);

impl FromStr for Term {
    type Err = InvalidTerm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once("->") {
            Some((via, target)) if is_identifier(via) && is_identifier(target) => {
                Ok(Term::indirect(via, target))
            }
            None if is_identifier(s) => Ok(Term::direct(s)),
            _ => Err(InvalidTerm(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDef {
    pub name: String,
    pub terms: Vec<Term>,
}

impl ActionDef {
    pub fn new(name: impl Into<String>, terms: Vec<Term>) -> Self {
        Self {
            name: name.into(),
            terms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDefinition {
    pub resource_type: String,
    pub relations: Vec<RelationDef>,
    pub actions: Vec<ActionDef>,
}

impl ResourceDefinition {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            relations: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn with_action(mut self, name: impl Into<String>, terms: Vec<Term>) -> Self {
        self.actions.push(ActionDef::new(name, terms));
        self
    }

    pub fn get_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn get_action(&self, name: &str) -> Option<&ActionDef> {
        self.actions.iter().find(|a| a.name == name)
    }
}

/// A parsed policy document: one definition per resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    pub resources: Vec<ResourceDefinition>,
}

impl Policy {
    pub fn get_resource(&self, resource_type: &str) -> Option<&ResourceDefinition> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type)
    }
}

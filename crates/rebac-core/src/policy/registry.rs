use std::collections::{HashMap, HashSet};

use super::types::{Policy, RelationDef, ResourceDefinition, Term};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyLimits {
    pub max_resource_types: usize,
    pub max_relations_per_type: usize,
    pub max_actions_per_type: usize,
    pub max_terms_per_action: usize,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            max_resource_types: 50,
            max_relations_per_type: 30,
            max_actions_per_type: 30,
            max_terms_per_action: 32,
        }
    }
}

/// Configuration errors. These never mean "access denied".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("resource type not found: {0}")]
    TypeNotFound(String),

    #[error("action '{action}' not found on resource type '{resource_type}'")]
    ActionNotFound {
        resource_type: String,
        action: String,
    },

    #[error("relation '{relation}' not found on resource type '{resource_type}'")]
    RelationNotFound {
        resource_type: String,
        relation: String,
    },

    #[error("resource type already registered: {0}")]
    AlreadyRegistered(String),

    #[error("action '{action}' on '{resource_type}' references undefined relation '{relation}'")]
    UndefinedRelation {
        resource_type: String,
        action: String,
        relation: String,
    },

    #[error(
        "action '{action}' on '{resource_type}' targets '{target}', which is neither a relation nor an action"
    )]
    UndefinedTarget {
        resource_type: String,
        action: String,
        target: String,
    },

    #[error("action '{action}' on '{resource_type}' has no terms")]
    EmptyAction {
        resource_type: String,
        action: String,
    },

    #[error("'{name}' is declared more than once on '{resource_type}'")]
    DuplicateName { resource_type: String, name: String },

    #[error("too many {what} in '{scope}': {count} exceeds limit of {limit}")]
    LimitExceeded {
        what: &'static str,
        scope: String,
        count: usize,
        limit: usize,
    },
}

/// Per-type relations and action rules, registered once at startup.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    resources: HashMap<String, ResourceDefinition>,
    limits: PolicyLimits,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: PolicyLimits) -> Self {
        Self {
            resources: HashMap::new(),
            limits,
        }
    }

    pub fn register_resource(&mut self, definition: ResourceDefinition) -> Result<(), PolicyError> {
        if self.resources.contains_key(&definition.resource_type) {
            return Err(PolicyError::AlreadyRegistered(definition.resource_type));
        }
        if self.resources.len() >= self.limits.max_resource_types {
            return Err(PolicyError::LimitExceeded {
                what: "resource types",
                scope: "registry".to_string(),
                count: self.resources.len() + 1,
                limit: self.limits.max_resource_types,
            });
        }
        validate_definition(&definition, &self.limits)?;

        tracing::debug!(
            resource_type = %definition.resource_type,
            relations = definition.relations.len(),
            actions = definition.actions.len(),
            "registered resource type"
        );
        self.resources
            .insert(definition.resource_type.clone(), definition);
        Ok(())
    }

    /// Registers every resource of a policy, or none of them.
    pub fn register_policy(&mut self, policy: Policy) -> Result<(), PolicyError> {
        let mut staged = self.clone();
        for definition in policy.resources {
            staged.register_resource(definition)?;
        }
        *self = staged;
        Ok(())
    }

    pub fn get(&self, resource_type: &str) -> Result<&ResourceDefinition, PolicyError> {
        self.resources
            .get(resource_type)
            .ok_or_else(|| PolicyError::TypeNotFound(resource_type.to_string()))
    }

    pub fn get_rule(&self, resource_type: &str, action: &str) -> Result<&[Term], PolicyError> {
        let definition = self.get(resource_type)?;
        definition
            .get_action(action)
            .map(|a| a.terms.as_slice())
            .ok_or_else(|| PolicyError::ActionNotFound {
                resource_type: resource_type.to_string(),
                action: action.to_string(),
            })
    }

    pub fn has_action(&self, resource_type: &str, action: &str) -> bool {
        self.resources
            .get(resource_type)
            .is_some_and(|d| d.get_action(action).is_some())
    }

    pub fn has_relation(&self, resource_type: &str, relation: &str) -> bool {
        self.resources
            .get(resource_type)
            .is_some_and(|d| d.get_relation(relation).is_some())
    }

    pub fn allows_subject(
        &self,
        resource_type: &str,
        relation: &str,
        subject_type: &str,
    ) -> Result<bool, PolicyError> {
        Ok(self
            .get_relation(resource_type, relation)?
            .allows(subject_type))
    }

    pub fn get_relation(
        &self,
        resource_type: &str,
        relation: &str,
    ) -> Result<&RelationDef, PolicyError> {
        self.get(resource_type)?
            .get_relation(relation)
            .ok_or_else(|| PolicyError::RelationNotFound {
                resource_type: resource_type.to_string(),
                relation: relation.to_string(),
            })
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

fn validate_definition(
    definition: &ResourceDefinition,
    limits: &PolicyLimits,
) -> Result<(), PolicyError> {
    let resource_type = &definition.resource_type;

    check_limit(
        "relations",
        resource_type,
        definition.relations.len(),
        limits.max_relations_per_type,
    )?;
    check_limit(
        "actions",
        resource_type,
        definition.actions.len(),
        limits.max_actions_per_type,
    )?;

    let mut names = HashSet::new();
    for name in definition
        .relations
        .iter()
        .map(|r| &r.name)
        .chain(definition.actions.iter().map(|a| &a.name))
    {
        if !names.insert(name.as_str()) {
            return Err(PolicyError::DuplicateName {
                resource_type: resource_type.clone(),
                name: name.clone(),
            });
        }
    }

    for action in &definition.actions {
        if action.terms.is_empty() {
            return Err(PolicyError::EmptyAction {
                resource_type: resource_type.clone(),
                action: action.name.clone(),
            });
        }
        check_limit(
            "terms",
            &format!("{resource_type}.{}", action.name),
            action.terms.len(),
            limits.max_terms_per_action,
        )?;

        for term in &action.terms {
            let (relation, target) = match term {
                Term::Direct(r) => (r, None),
                Term::Indirect(via, target) => (via, Some(target)),
            };
            if definition.get_relation(relation).is_none() {
                return Err(PolicyError::UndefinedRelation {
                    resource_type: resource_type.clone(),
                    action: action.name.clone(),
                    relation: relation.clone(),
                });
            }
            if let Some(target) = target
                && definition.get_relation(target).is_none()
                && definition.get_action(target).is_none()
            {
                return Err(PolicyError::UndefinedTarget {
                    resource_type: resource_type.clone(),
                    action: action.name.clone(),
                    target: target.clone(),
                });
            }
        }
    }

    Ok(())
}

fn check_limit(what: &'static str, scope: &str, count: usize, limit: usize) -> Result<(), PolicyError> {
    if count > limit {
        return Err(PolicyError::LimitExceeded {
            what,
            scope: scope.to_string(),
            count,
            limit,
        });
    }
    Ok(())
}

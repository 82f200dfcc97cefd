use std::collections::HashSet;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use super::types::{ActionDef, AllowedSubject, Policy, RelationDef, ResourceDefinition, Term};

#[derive(Parser)]
#[grammar = "policy/grammar.pest"]
struct PolicyParser;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyParseError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),
    #[error("duplicate relation '{relation}' in resource '{resource_type}'")]
    DuplicateRelation {
        resource_type: String,
        relation: String,
    },
    #[error("duplicate action '{action}' in resource '{resource_type}'")]
    DuplicateAction {
        resource_type: String,
        action: String,
    },
}

pub fn parse_policy(input: &str) -> Result<Policy, PolicyParseError> {
    let pairs = PolicyParser::parse(Rule::policy, input)
        .map_err(|e| PolicyParseError::Syntax(e.to_string()))?;

    let mut resources = Vec::new();
    let mut seen = HashSet::new();

    for pair in pairs {
        if pair.as_rule() != Rule::policy {
            continue;
        }
        for inner in pair.into_inner() {
            if inner.as_rule() == Rule::resource {
                let resource = parse_resource(inner)?;
                if !seen.insert(resource.resource_type.clone()) {
                    return Err(PolicyParseError::DuplicateResource(resource.resource_type));
                }
                resources.push(resource);
            }
        }
    }

    Ok(Policy { resources })
}

fn missing_token(context: &str) -> PolicyParseError {
    PolicyParseError::Syntax(format!("missing token: {context}"))
}

fn unexpected_rule(rule: Rule) -> PolicyParseError {
    PolicyParseError::Syntax(format!("unexpected rule: {rule:?}"))
}

fn is_keyword(rule: Rule) -> bool {
    matches!(rule, Rule::kw_resource | Rule::kw_relation | Rule::kw_action)
}

fn significant(pair: Pair<'_, Rule>) -> impl Iterator<Item = Pair<'_, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn parse_resource(pair: Pair<'_, Rule>) -> Result<ResourceDefinition, PolicyParseError> {
    let mut inner = significant(pair);
    let resource_type = inner
        .next()
        .ok_or_else(|| missing_token("resource name"))?
        .as_str()
        .to_string();
    let body = inner.next().ok_or_else(|| missing_token("resource body"))?;

    let mut relations = Vec::new();
    let mut actions = Vec::new();
    let mut seen_relations = HashSet::new();
    let mut seen_actions = HashSet::new();

    for item in body.into_inner() {
        match item.as_rule() {
            Rule::relation_def => {
                let relation = parse_relation_def(item)?;
                if !seen_relations.insert(relation.name.clone()) {
                    return Err(PolicyParseError::DuplicateRelation {
                        resource_type,
                        relation: relation.name,
                    });
                }
                relations.push(relation);
            }
            Rule::action_def => {
                let action = parse_action_def(item)?;
                if !seen_actions.insert(action.name.clone()) {
                    return Err(PolicyParseError::DuplicateAction {
                        resource_type,
                        action: action.name,
                    });
                }
                actions.push(action);
            }
            other => return Err(unexpected_rule(other)),
        }
    }

    Ok(ResourceDefinition {
        resource_type,
        relations,
        actions,
    })
}

fn parse_relation_def(pair: Pair<'_, Rule>) -> Result<RelationDef, PolicyParseError> {
    let mut inner = significant(pair);
    let name = inner
        .next()
        .ok_or_else(|| missing_token("relation name"))?
        .as_str()
        .to_string();
    let list = inner
        .next()
        .ok_or_else(|| missing_token("subject type list"))?;

    let subject_types = list
        .into_inner()
        .map(parse_subject_type)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RelationDef {
        name,
        subject_types,
    })
}

fn parse_subject_type(pair: Pair<'_, Rule>) -> Result<AllowedSubject, PolicyParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| missing_token("subject type"))?;
    match inner.as_rule() {
        Rule::wildcard => Ok(AllowedSubject::Any),
        Rule::identifier => Ok(AllowedSubject::Type(inner.as_str().to_string())),
        other => Err(unexpected_rule(other)),
    }
}

fn parse_action_def(pair: Pair<'_, Rule>) -> Result<ActionDef, PolicyParseError> {
    let mut inner = significant(pair);
    let name = inner
        .next()
        .ok_or_else(|| missing_token("action name"))?
        .as_str()
        .to_string();
    let expr = inner
        .next()
        .ok_or_else(|| missing_token("action expression"))?;

    let terms = expr
        .into_inner()
        .map(parse_action_term)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ActionDef { name, terms })
}

fn parse_action_term(pair: Pair<'_, Rule>) -> Result<Term, PolicyParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| missing_token("action term"))?;
    match inner.as_rule() {
        Rule::indirection => {
            let mut parts = inner.into_inner();
            let via = parts
                .next()
                .ok_or_else(|| missing_token("indirection source"))?
                .as_str();
            let target = parts
                .next()
                .ok_or_else(|| missing_token("indirection target"))?
                .as_str();
            Ok(Term::indirect(via, target))
        }
        Rule::identifier => Ok(Term::direct(inner.as_str())),
        other => Err(unexpected_rule(other)),
    }
}

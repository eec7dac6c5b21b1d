//! Set-theory queries over resources by attribute value.
//!
//! A query is a whitespace separated list of `[+|-]name[_regex]=value` terms. Values may be
//! quoted with `'` or `"` to include whitespace. Terms are applied left to right to a running
//! result that starts as the full candidate collection:
//!
//! - bare `name=value` keeps only resources that also match ([SetOp::Intersection]),
//! - `+name=value` adds matching resources ([SetOp::Union]),
//! - `-name=value` removes matching resources ([SetOp::Difference]).
//!
//! A `_regex` suffix matches the value as an unanchored regular expression instead of exactly.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[cfg(feature = "service")]
use sqlx::{QueryBuilder, Sqlite};

use crate::{
    attribute::AttributeDefinition,
    error::{NsotError, ValidationError},
    inheritance::ResourceTree,
    properties::{ResourceId, ResourceType, SiteId},
    schema::AttributeStore,
    value::{ValueMatch, ValueStore},
};

pub const REGEX_SUFFIX: &str = "_regex";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOp {
    Union,
    Intersection,
    Difference,
}

impl SetOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetOp::Union => "union",
            SetOp::Intersection => "intersection",
            SetOp::Difference => "difference",
        }
    }

    /// Apply this operation to the running result.
    pub fn apply(
        &self,
        running: BTreeSet<ResourceId>,
        candidates: &BTreeSet<ResourceId>,
        matched: &BTreeSet<ResourceId>,
    ) -> BTreeSet<ResourceId> {
        match self {
            SetOp::Union => running
                .union(&matched.intersection(candidates).copied().collect())
                .copied()
                .collect(),
            SetOp::Intersection => running.intersection(matched).copied().collect(),
            SetOp::Difference => running.difference(matched).copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTerm {
    pub op: SetOp,
    /// Attribute name with any `_regex` suffix removed.
    pub name: String,
    pub value: String,
    pub regex: bool,
}

impl QueryTerm {
    pub fn matcher(&self) -> Result<ValueMatch, ValidationError> {
        if self.regex {
            Regex::new(&self.value).map(ValueMatch::Regex).map_err(|e| {
                ValidationError::field(
                    "query",
                    format!("Invalid regex for {}: {e}", self.name),
                )
            })
        } else {
            Ok(ValueMatch::Exact(self.value.clone()))
        }
    }
}

/// Split `query` on whitespace, honoring single quotes, double quotes and backslash escapes.
/// Inside double quotes a backslash only escapes `"` and `\`; before anything else it is kept.
fn split_tokens(query: &str) -> Result<Vec<String>, ValidationError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = query.chars().peekable();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => match chars.peek() {
                Some(&next) if next == '"' || next == '\\' => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push(c),
            },
            (None, '\\') => match chars.next() {
                Some(escaped) => {
                    current.push(escaped);
                    in_token = true;
                }
                None => {
                    return Err(ValidationError::field(
                        "query",
                        "No escaped character",
                    ))
                }
            },
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if quote.is_some() {
        return Err(ValidationError::field("query", "No closing quotation"));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Parse a query string into its terms. An empty or whitespace-only query yields no terms.
pub fn parse_set_query(query: &str) -> Result<Vec<QueryTerm>, ValidationError> {
    let mut terms = Vec::new();
    for token in split_tokens(query)? {
        let (op, rest) = match token.chars().next() {
            Some('+') => (SetOp::Union, &token[1..]),
            Some('-') => (SetOp::Difference, &token[1..]),
            _ => (SetOp::Intersection, token.as_str()),
        };
        let Some((name, value)) = rest.split_once('=') else {
            return Err(ValidationError::field(
                "query",
                format!("Invalid query term {token:?}: expected name=value"),
            ));
        };
        if name.is_empty() {
            return Err(ValidationError::field(
                "query",
                format!("Invalid query term {token:?}: missing attribute name"),
            ));
        }
        let (name, regex) = match name.strip_suffix(REGEX_SUFFIX) {
            Some(stripped) if !stripped.is_empty() => (stripped, true),
            _ => (name, false),
        };
        terms.push(QueryTerm {
            op,
            name: name.to_string(),
            value: value.to_string(),
            regex,
        });
    }
    Ok(terms)
}

pub(crate) fn unknown_attribute(name: &str) -> ValidationError {
    ValidationError::field(
        "query",
        format!("Attribute matching query does not exist: {name:?}"),
    )
}

pub(crate) fn empty_query(resource_type: ResourceType) -> ValidationError {
    ValidationError::field(
        "query",
        format!("Query empty, unable to provide {resource_type}"),
    )
}

pub(crate) fn not_unique(count: usize) -> ValidationError {
    ValidationError::field(
        "query",
        format!("Query returned {count} results, but exactly 1 expected"),
    )
}

/// A parsed query bound to a resource type and optional site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetQuery {
    pub resource_type: ResourceType,
    pub site_id: Option<SiteId>,
    pub terms: Vec<QueryTerm>,
}

impl SetQuery {
    pub fn parse(
        resource_type: ResourceType,
        query: &str,
        site_id: Option<SiteId>,
    ) -> Result<SetQuery, ValidationError> {
        Ok(SetQuery {
            resource_type,
            site_id,
            terms: parse_set_query(query)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Resolve each term's attribute. An unknown name is an error rather than an empty match.
    pub fn resolve<'a>(
        &self,
        schema: &'a AttributeStore,
    ) -> Result<Vec<Vec<&'a AttributeDefinition>>, ValidationError> {
        self.terms
            .iter()
            .map(|term| {
                let found = schema.find(self.resource_type, &term.name, self.site_id);
                if found.is_empty() {
                    Err(unknown_attribute(&term.name))
                } else {
                    Ok(found)
                }
            })
            .collect()
    }
}

/// Stores a query is evaluated against.
pub struct QueryContext<'a> {
    pub schema: &'a AttributeStore,
    pub values: &'a ValueStore,
    /// When set, intersection terms on inheritable attributes also match descendants that
    /// inherit the value.
    pub tree: Option<&'a ResourceTree>,
}

impl<'a> QueryContext<'a> {
    pub fn new(schema: &'a AttributeStore, values: &'a ValueStore) -> QueryContext<'a> {
        QueryContext {
            schema,
            values,
            tree: None,
        }
    }

    pub fn with_inheritance(mut self, tree: &'a ResourceTree) -> QueryContext<'a> {
        self.tree = Some(tree);
        self
    }

    /// Evaluate `query` over `candidates`, which must already be narrowed to the resource type
    /// and site. With `unique`, anything but exactly one result is an error.
    pub fn set_query(
        &self,
        candidates: &BTreeSet<ResourceId>,
        query: &SetQuery,
        unique: bool,
    ) -> Result<BTreeSet<ResourceId>, NsotError> {
        if query.is_empty() {
            if unique {
                return Err(empty_query(query.resource_type).into());
            }
            return Ok(BTreeSet::new());
        }

        let resolved = query.resolve(self.schema)?;
        let mut running = candidates.clone();
        tracing::debug!("QUERY [start]: {} candidates", running.len());
        for (term, attrs) in query.terms.iter().zip(resolved) {
            let matcher = term.matcher()?;
            let mut matched = self
                .values
                .matching(query.resource_type, &term.name, &matcher);
            if term.op == SetOp::Intersection && attrs.iter().any(|a| a.inheritable) {
                if let Some(tree) = self.tree {
                    let overriders = self
                        .values
                        .matching(query.resource_type, &term.name, &ValueMatch::Any)
                        .difference(&matched)
                        .copied()
                        .collect();
                    matched = tree.expand_matches(&matched, &overriders);
                }
            }
            running = term.op.apply(running, candidates, &matched);
            tracing::debug!(
                "QUERY [{}] {}{}={:?}: {} resources",
                term.op.as_str(),
                term.name,
                if term.regex { REGEX_SUFFIX } else { "" },
                term.value,
                running.len()
            );
        }

        if unique && running.len() != 1 {
            return Err(not_unique(running.len()).into());
        }
        Ok(running)
    }

    /// Exact-match lookup of one attribute value. Unknown names simply match nothing.
    pub fn by_attribute(
        &self,
        candidates: &BTreeSet<ResourceId>,
        resource_type: ResourceType,
        name: &str,
        value: &str,
    ) -> BTreeSet<ResourceId> {
        self.values
            .matching(resource_type, name, &ValueMatch::Exact(value.to_string()))
            .intersection(candidates)
            .copied()
            .collect()
    }
}

#[cfg(feature = "service")]
pub trait AsSql {
    fn build_query(&self, match_pred: bool, qb: &mut QueryBuilder<Sqlite>);
}

#[cfg(feature = "service")]
impl AsSql for QueryTerm {
    /// `SELECT resource_id` of the values matching (or, with `!match_pred`, not matching) this
    /// term. The resource type is bound by [SetQuery].
    fn build_query(&self, match_pred: bool, qb: &mut QueryBuilder<Sqlite>) {
        qb.push("SELECT DISTINCT resource_id FROM attribute_values WHERE name = ");
        qb.push_bind(self.name.clone());
        qb.push(if match_pred { " AND " } else { " AND NOT " });
        if self.regex {
            qb.push("value REGEXP ");
        } else {
            qb.push("value = ");
        }
        qb.push_bind(self.value.clone());
        qb.push(" ");
    }
}

#[cfg(feature = "service")]
impl AsSql for SetQuery {
    /// Render the whole query as a chain of compound selects, seeded by every resource of the type
    /// (in the site, if given) that owns at least one value row.
    fn build_query(&self, match_pred: bool, qb: &mut QueryBuilder<Sqlite>) {
        qb.push("SELECT resource_id FROM ( SELECT DISTINCT resource_id FROM attribute_values WHERE resource_type = ");
        qb.push_bind(self.resource_type.to_string());
        if let Some(site_id) = self.site_id {
            qb.push(" AND site_id = ");
            qb.push_bind(site_id.0 as i64);
        }
        qb.push(" ");
        for term in self.terms.iter() {
            match term.op {
                SetOp::Union => qb.push("UNION "),
                SetOp::Intersection => qb.push("INTERSECT "),
                SetOp::Difference => qb.push("EXCEPT "),
            };
            qb.push("SELECT * FROM ( ");
            term.build_query(match_pred, qb);
            qb.push("AND resource_type = ");
            qb.push_bind(self.resource_type.to_string());
            if let Some(site_id) = self.site_id {
                qb.push(" AND site_id = ");
                qb.push_bind(site_id.0 as i64);
            }
            qb.push(") ");
        }
        qb.push(") ORDER BY resource_id");
    }
}

//! Query Service - Composable Filter Evaluation
//!
//! Executes structured query definitions against any store backend and
//! returns a bounded, counted, deterministic result set.
//!
//! # Architecture
//!
//! - **Backend-agnostic**: the service holds an `Arc<dyn NodeStore>` and is
//!   the only query implementation, so both engines share its semantics.
//! - **Driving filter + re-check**: one filter narrows the candidate set
//!   through an indexed store primitive (supertag membership first, content
//!   search second, full scan last); every candidate is then assembled and
//!   ALL filters are re-applied as in-memory predicates.
//! - **Soft-delete exclusion for free**: candidates pass through
//!   `assemble_node`, which returns `None` for soft-deleted nodes, so no
//!   filter combination can ever resurface them.
//! - **Determinism**: matches are sorted by node id before truncation;
//!   `total_count` is taken pre-limit.

use crate::db::{inheritance, NodeStore, StoreError, StoreResult};
use crate::models::{AssembledNode, NodeRecord, PropertyValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Result cap applied when a query does not specify its own limit.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// A composable query: filters are implicitly AND-combined.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    pub filters: Vec<QueryFilter>,
    /// Maximum nodes returned (`total_count` is unaffected)
    pub limit: Option<usize>,
}

/// Comparison operator for property filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyOp {
    Eq,
    Ne,
    Contains,
    Gt,
    Lt,
    Gte,
    Lte,
}

/// One filter condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QueryFilter {
    /// Supertag membership, optionally inheritance-aware ("is-a")
    #[serde(rename_all = "camelCase")]
    Supertag {
        supertag_id: String,
        #[serde(default)]
        include_inherited: bool,
    },

    /// Operator match on a field's value; multi-valued fields match when
    /// ANY binding satisfies the operator
    #[serde(rename_all = "camelCase")]
    Property {
        field_id: String,
        op: PropertyOp,
        value: Value,
    },

    /// Substring match against node content
    #[serde(rename_all = "camelCase")]
    Content {
        query: String,
        #[serde(default)]
        case_sensitive: bool,
    },

    /// Existence (or absence, when negated) of any binding for a field
    #[serde(rename_all = "camelCase")]
    HasField {
        field_id: String,
        #[serde(default)]
        negate: bool,
    },
}

/// Evaluated query output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Matching nodes, at most `limit`, ordered by id
    pub nodes: Vec<AssembledNode>,
    /// Total matches before limit truncation
    pub total_count: usize,
    /// Evaluation timestamp
    pub evaluated_at: DateTime<Utc>,
}

/// Filter with supertag acceptance sets resolved up front, so the per-node
/// predicate stays synchronous.
enum PreparedFilter {
    Supertag { accepted: HashSet<String> },
    Property {
        field_id: String,
        op: PropertyOp,
        value: Value,
    },
    Content {
        needle: String,
        case_sensitive: bool,
    },
    HasField { field_id: String, negate: bool },
}

/// Service for executing queries against the store.
pub struct QueryService {
    store: Arc<dyn NodeStore>,
}

impl QueryService {
    /// Create a new QueryService over any backend.
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    /// Execute a query definition.
    ///
    /// For a fixed data snapshot and filter set, `total_count` and the
    /// identity of the returned nodes are stable across calls.
    pub async fn evaluate(&self, query: &QueryDefinition) -> StoreResult<QueryResult> {
        let prepared = self.prepare(query).await?;
        let candidates = self.candidates(&prepared).await?;

        let mut seen = HashSet::new();
        let mut matches = Vec::new();
        for record in candidates {
            if !seen.insert(record.id.clone()) {
                continue;
            }
            // assemble_node drops soft-deleted nodes regardless of filters
            let Some(assembled) = self.store.assemble_node(&record.id).await? else {
                continue;
            };
            if prepared.iter().all(|f| Self::matches(f, &assembled)) {
                matches.push(assembled);
            }
        }

        matches.sort_by(|a, b| a.id.cmp(&b.id));
        let total_count = matches.len();
        matches.truncate(query.limit.unwrap_or(DEFAULT_QUERY_LIMIT));

        Ok(QueryResult {
            nodes: matches,
            total_count,
            evaluated_at: Utc::now(),
        })
    }

    /// Resolve supertag acceptance sets. An unknown supertag id yields an
    /// empty acceptance set (zero matches), not an error.
    async fn prepare(&self, query: &QueryDefinition) -> StoreResult<Vec<PreparedFilter>> {
        let mut prepared = Vec::with_capacity(query.filters.len());
        for filter in &query.filters {
            prepared.push(match filter {
                QueryFilter::Supertag {
                    supertag_id,
                    include_inherited,
                } => {
                    let accepted = if *include_inherited {
                        match inheritance::descendant_system_ids(
                            self.store.as_ref(),
                            supertag_id,
                        )
                        .await
                        {
                            Ok(ids) => ids.into_iter().collect(),
                            Err(StoreError::SupertagNotFound { .. }) => HashSet::new(),
                            Err(e) => return Err(e),
                        }
                    } else {
                        match self.store.find_supertag_by_system_id(supertag_id).await? {
                            Some(tag) => HashSet::from([tag.system_id]),
                            None => HashSet::new(),
                        }
                    };
                    PreparedFilter::Supertag { accepted }
                }
                QueryFilter::Property {
                    field_id,
                    op,
                    value,
                } => PreparedFilter::Property {
                    field_id: field_id.clone(),
                    op: *op,
                    value: value.clone(),
                },
                QueryFilter::Content {
                    query,
                    case_sensitive,
                } => PreparedFilter::Content {
                    needle: if *case_sensitive {
                        query.clone()
                    } else {
                        query.to_lowercase()
                    },
                    case_sensitive: *case_sensitive,
                },
                QueryFilter::HasField { field_id, negate } => PreparedFilter::HasField {
                    field_id: field_id.clone(),
                    negate: *negate,
                },
            });
        }
        Ok(prepared)
    }

    /// Narrow the candidate set through the most selective store primitive
    /// available; remaining filters are re-checked per node anyway.
    async fn candidates(&self, prepared: &[PreparedFilter]) -> StoreResult<Vec<NodeRecord>> {
        for filter in prepared {
            if let PreparedFilter::Supertag { accepted } = filter {
                let ids: Vec<String> = {
                    let mut ids: Vec<String> = accepted.iter().cloned().collect();
                    ids.sort();
                    ids
                };
                return self.store.get_nodes_by_supertags(&ids, false).await;
            }
        }
        for filter in prepared {
            if let PreparedFilter::Content {
                needle,
                case_sensitive,
            } = filter
            {
                return self
                    .store
                    .search_nodes_by_content(needle, *case_sensitive)
                    .await;
            }
        }
        self.store.list_nodes(false).await
    }

    fn matches(filter: &PreparedFilter, node: &AssembledNode) -> bool {
        match filter {
            PreparedFilter::Supertag { accepted } => node
                .supertags
                .iter()
                .any(|tag| accepted.contains(&tag.system_id)),
            PreparedFilter::Property {
                field_id,
                op,
                value,
            } => node
                .field_values(field_id)
                .iter()
                .any(|bound| Self::value_matches(*op, bound, value)),
            PreparedFilter::Content {
                needle,
                case_sensitive,
            } => match &node.content {
                Some(content) if *case_sensitive => content.contains(needle.as_str()),
                Some(content) => content.to_lowercase().contains(needle.as_str()),
                None => false,
            },
            PreparedFilter::HasField { field_id, negate } => node.has_field(field_id) != *negate,
        }
    }

    fn value_matches(op: PropertyOp, bound: &PropertyValue, expected: &Value) -> bool {
        let actual = bound.to_json();
        match op {
            PropertyOp::Eq => actual == *expected,
            PropertyOp::Ne => actual != *expected,
            PropertyOp::Contains => match (&actual, expected) {
                (Value::String(a), Value::String(b)) => a.contains(b.as_str()),
                (Value::Array(items), b) => items.contains(b),
                _ => false,
            },
            PropertyOp::Gt | PropertyOp::Lt | PropertyOp::Gte | PropertyOp::Lte => {
                match (actual.as_f64(), expected.as_f64()) {
                    (Some(a), Some(b)) => match op {
                        PropertyOp::Gt => a > b,
                        PropertyOp::Lt => a < b,
                        PropertyOp::Gte => a >= b,
                        PropertyOp::Lte => a <= b,
                        _ => unreachable!(),
                    },
                    _ => false,
                }
            }
        }
    }
}

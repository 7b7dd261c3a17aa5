//! Supertag Inheritance Resolution
//!
//! Walks `extends` chains to produce ancestor lists, merged field defaults
//! and "is-a" node lookups. All functions are generic over the store contract
//! and are surfaced as provided methods on [`NodeStore`], so both backends
//! share a single resolution implementation.
//!
//! The observed chain walk has no natural terminator for cyclic data, so
//! every walk here is bounded twice: a visited set breaks cycles and a depth
//! cap bounds pathological chains even when `max_depth` is not supplied.

use crate::db::error::{StoreError, StoreResult};
use crate::db::node_store::NodeStore;
use crate::models::{
    AssembledNode, AssembledProperty, NodeRecord, PropertyValue, ResolvedFieldDefault, SupertagDef,
};
use std::collections::{BTreeMap, HashSet};

/// Depth cap applied when a caller does not supply `max_depth`.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Ancestors of `supertag_system_id`, nearest first.
///
/// A dangling `extends` reference terminates the walk silently; an unknown
/// starting tag is an error.
pub async fn ancestor_chain<S>(
    store: &S,
    supertag_system_id: &str,
    max_depth: Option<usize>,
) -> StoreResult<Vec<SupertagDef>>
where
    S: NodeStore + ?Sized,
{
    let start = store
        .find_supertag_by_system_id(supertag_system_id)
        .await?
        .ok_or_else(|| StoreError::supertag_not_found(supertag_system_id))?;

    let depth = max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
    let mut visited = HashSet::new();
    visited.insert(start.system_id.clone());

    let mut chain = Vec::new();
    let mut next = start.extends;
    while let Some(parent_system_id) = next {
        if chain.len() >= depth {
            break;
        }
        if !visited.insert(parent_system_id.clone()) {
            // cycle in extends data
            break;
        }
        match store.find_supertag_by_system_id(&parent_system_id).await? {
            Some(parent) => {
                next = parent.extends.clone();
                chain.push(parent);
            }
            None => break,
        }
    }

    Ok(chain)
}

/// Field defaults merged across the tag's own schema and its ancestors,
/// keyed by field system id. Closest definition in the chain wins. Schema
/// entries whose field system id does not resolve are skipped (bulk seeding
/// may interleave tag and field creation).
pub async fn field_definitions<S>(
    store: &S,
    supertag_system_id: &str,
) -> StoreResult<BTreeMap<String, ResolvedFieldDefault>>
where
    S: NodeStore + ?Sized,
{
    let own = store
        .find_supertag_by_system_id(supertag_system_id)
        .await?
        .ok_or_else(|| StoreError::supertag_not_found(supertag_system_id))?;

    let mut tags = vec![own];
    tags.extend(ancestor_chain(store, supertag_system_id, None).await?);

    let mut merged = BTreeMap::new();
    for tag in &tags {
        for entry in &tag.field_schema {
            if merged.contains_key(&entry.field_system_id) {
                continue;
            }
            let Some(field) = store.find_field_by_system_id(&entry.field_system_id).await? else {
                continue;
            };
            let default_value = entry
                .default_value
                .as_ref()
                .map(|raw| PropertyValue::from_json(field.value_type, raw.clone()));
            merged.insert(
                entry.field_system_id.clone(),
                ResolvedFieldDefault {
                    field_node_id: field.node_id,
                    field_name: field.name,
                    default_value,
                },
            );
        }
    }

    Ok(merged)
}

/// System ids of the tag itself plus every tag whose ancestor chain includes
/// it (the "is-a" acceptance set).
pub async fn descendant_system_ids<S>(
    store: &S,
    supertag_system_id: &str,
) -> StoreResult<Vec<String>>
where
    S: NodeStore + ?Sized,
{
    store
        .find_supertag_by_system_id(supertag_system_id)
        .await?
        .ok_or_else(|| StoreError::supertag_not_found(supertag_system_id))?;

    let mut matching = vec![supertag_system_id.to_string()];
    for tag in store.list_supertags().await? {
        if tag.system_id == supertag_system_id {
            continue;
        }
        let chain = ancestor_chain(store, &tag.system_id, None).await?;
        if chain.iter().any(|a| a.system_id == supertag_system_id) {
            matching.push(tag.system_id);
        }
    }

    Ok(matching)
}

/// Active nodes tagged with the supertag or any of its descendants.
pub async fn nodes_with_inheritance<S>(
    store: &S,
    supertag_system_id: &str,
) -> StoreResult<Vec<NodeRecord>>
where
    S: NodeStore + ?Sized,
{
    let accepted = descendant_system_ids(store, supertag_system_id).await?;
    store.get_nodes_by_supertags(&accepted, false).await
}

/// Assemble a node, then fill each field the node does not bind itself with
/// the nearest resolved default. Own values always win; memberships are
/// consulted in order, so the first tag supplying a default for a field wins
/// over later ones.
pub async fn assemble_with_inheritance<S>(
    store: &S,
    id: &str,
) -> StoreResult<Option<AssembledNode>>
where
    S: NodeStore + ?Sized,
{
    let Some(mut assembled) = store.assemble_node(id).await? else {
        return Ok(None);
    };

    let memberships = assembled.supertags.clone();
    for tag in &memberships {
        let defaults = field_definitions(store, &tag.system_id).await?;
        for (field_system_id, resolved) in &defaults {
            let Some(value) = &resolved.default_value else {
                continue;
            };
            if assembled.has_field(field_system_id) {
                continue;
            }
            assembled
                .properties
                .entry(resolved.field_name.clone())
                .or_default()
                .push(AssembledProperty {
                    value: value.clone(),
                    order: 0,
                    field_system_id: field_system_id.clone(),
                    field_name: resolved.field_name.clone(),
                });
        }
    }

    Ok(Some(assembled))
}

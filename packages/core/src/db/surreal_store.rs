//! SurrealStore - NodeStore Implementation for the SurrealDB Backend
//!
//! Graph-native rendition of the store contract on embedded SurrealDB
//! (RocksDB engine). Nodes, field and supertag definitions are records;
//! property bindings are `props` edges from node to field; memberships and
//! generic semantic relations share the `relates` edge table, discriminated
//! by `relation_type`.
//!
//! # Design Principles
//!
//! 1. **Embedded RocksDB**: desktop-local engine, no server process.
//! 2. **SCHEMALESS tables**: record shapes are owned by this module, not by
//!    table definitions.
//! 3. **UUID field addressing**: every record carries a `uuid` field and is
//!    looked up through it, keeping exposed ids engine-neutral while record
//!    ids stay native (`node:⟨uuid⟩`).
//! 4. **Events after commit**: every mutation emits on the injected
//!    [`MutationBus`] only after its statement succeeded.

use crate::db::assembler;
use crate::db::error::{StoreError, StoreResult};
use crate::db::events::{MutationBus, MutationEvent};
use crate::db::node_store::NodeStore;
use crate::models::{
    AssembledNode, CreateNodeOptions, FieldDef, FieldDefault, NodeRecord, PropertyBinding,
    PropertyValue, RelationKind, SupertagDef, SupertagRef, SupertagSpec, ValueType,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use surrealdb::engine::local::{Db, RocksDb};
use surrealdb::Surreal;
use uuid::Uuid;

/// Internal struct matching the node record shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SurrealNodeRow {
    uuid: String,
    content: Option<String>,
    content_plain: Option<String>,
    system_id: Option<String>,
    owner_id: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl From<SurrealNodeRow> for NodeRecord {
    fn from(row: SurrealNodeRow) -> Self {
        NodeRecord {
            id: row.uuid,
            content: row.content,
            content_plain: row.content_plain,
            system_id: row.system_id,
            owner_id: row.owner_id,
            created_at: parse_rfc3339_or_now(&row.created_at),
            updated_at: parse_rfc3339_or_now(&row.updated_at),
            deleted_at: row.deleted_at.as_deref().map(parse_rfc3339_or_now),
        }
    }
}

fn parse_rfc3339_or_now(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Internal struct matching the field record shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SurrealFieldRow {
    uuid: String,
    system_id: String,
    name: String,
    value_type: String,
}

/// Internal struct matching the supertag record shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SurrealTagRow {
    uuid: String,
    system_id: String,
    name: String,
    extends: Option<String>,
    #[serde(default)]
    field_schema: Vec<FieldDefault>,
}

impl From<SurrealTagRow> for SupertagDef {
    fn from(row: SurrealTagRow) -> Self {
        SupertagDef {
            node_id: row.uuid,
            system_id: row.system_id,
            name: row.name,
            extends: row.extends,
            field_schema: row.field_schema,
        }
    }
}

/// One props edge joined with its field record.
#[derive(Debug, Deserialize)]
struct SurrealBindingRow {
    ord: i64,
    value: Value,
    field_node_id: String,
    field_system_id: String,
    field_name: String,
    value_type: String,
}

/// One membership edge joined with its supertag record.
#[derive(Debug, Deserialize)]
struct SurrealMembershipRow {
    ord: i64,
    system_id: String,
    content: String,
}

/// Membership pair used by the tag-set scan.
#[derive(Debug, Deserialize)]
struct SurrealTaggedRow {
    node_uuid: String,
    tag_system_id: String,
}

/// Edge endpoint row for relation listings.
#[derive(Debug, Deserialize)]
struct SurrealEndpointRow {
    ord: i64,
    other: String,
}

/// Bare ord row, used when computing the next append position.
#[derive(Debug, Deserialize)]
struct SurrealOrdRow {
    ord: i64,
}

/// SurrealStore implements the NodeStore trait over embedded SurrealDB.
pub struct SurrealStore {
    /// SurrealDB connection (embedded RocksDB)
    db: Arc<Surreal<Db>>,

    /// Injected mutation event bus
    bus: Arc<MutationBus>,
}

impl SurrealStore {
    /// Open (or create) the RocksDB-backed database at `db_path`.
    pub async fn new(db_path: PathBuf, bus: Arc<MutationBus>) -> StoreResult<Self> {
        let db = Surreal::new::<RocksDb>(db_path)
            .await
            .context("failed to initialize SurrealDB with RocksDB backend")?;

        db.use_ns("toolspace")
            .use_db("graph")
            .await
            .context("failed to set namespace/database")?;

        let db = Arc::new(db);
        Self::initialize_schema(&db).await?;

        tracing::debug!("surreal store ready");
        Ok(Self { db, bus })
    }

    /// Define tables (idempotent). All SCHEMALESS; the two edge tables are
    /// relations.
    async fn initialize_schema(db: &Surreal<Db>) -> StoreResult<()> {
        db.query(
            "
            DEFINE TABLE IF NOT EXISTS node SCHEMALESS;
            DEFINE TABLE IF NOT EXISTS field SCHEMALESS;
            DEFINE TABLE IF NOT EXISTS supertag SCHEMALESS;
            DEFINE TABLE IF NOT EXISTS props SCHEMALESS TYPE RELATION;
            DEFINE TABLE IF NOT EXISTS relates SCHEMALESS TYPE RELATION;
            ",
        )
        .await
        .context("failed to define tables")?
        .check()
        .context("failed to apply table definitions")?;
        Ok(())
    }

    async fn node_by_uuid(&self, uuid: &str) -> StoreResult<Option<NodeRecord>> {
        let mut response = self
            .db
            .query("SELECT * FROM node WHERE uuid = $uuid LIMIT 1;")
            .bind(("uuid", uuid.to_string()))
            .await
            .context("failed to query node by uuid")?;
        let rows: Vec<SurrealNodeRow> =
            response.take(0).context("failed to extract node rows")?;
        Ok(rows.into_iter().map(Into::into).next())
    }

    async fn require_node(&self, uuid: &str) -> StoreResult<NodeRecord> {
        self.node_by_uuid(uuid)
            .await?
            .ok_or_else(|| StoreError::node_not_found(uuid))
    }

    async fn field_by_system_id(&self, system_id: &str) -> StoreResult<Option<FieldDef>> {
        let mut response = self
            .db
            .query("SELECT * FROM field WHERE system_id = $system_id LIMIT 1;")
            .bind(("system_id", system_id.to_string()))
            .await
            .context("failed to query field by system id")?;
        let rows: Vec<SurrealFieldRow> =
            response.take(0).context("failed to extract field rows")?;

        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let value_type = ValueType::parse(&row.value_type).ok_or_else(|| {
            StoreError::engine(format!(
                "unknown value_type '{}' in field record",
                row.value_type
            ))
        })?;
        Ok(Some(FieldDef {
            node_id: row.uuid,
            system_id: row.system_id,
            name: row.name,
            value_type,
        }))
    }

    async fn require_field(&self, system_id: &str) -> StoreResult<FieldDef> {
        self.field_by_system_id(system_id)
            .await?
            .ok_or_else(|| StoreError::field_not_found(system_id))
    }

    async fn supertag_by_system_id(&self, system_id: &str) -> StoreResult<Option<SupertagDef>> {
        let mut response = self
            .db
            .query("SELECT * FROM supertag WHERE system_id = $system_id LIMIT 1;")
            .bind(("system_id", system_id.to_string()))
            .await
            .context("failed to query supertag by system id")?;
        let rows: Vec<SurrealTagRow> =
            response.take(0).context("failed to extract supertag rows")?;
        Ok(rows.into_iter().map(Into::into).next())
    }

    /// Count membership edges between a node and a tag (0 or 1 by invariant).
    async fn membership_exists(&self, node_uuid: &str, tag_uuid: &str) -> StoreResult<bool> {
        let mut response = self
            .db
            .query(
                "SELECT ord FROM relates
                 WHERE in.uuid = $node_uuid AND out.uuid = $tag_uuid
                   AND relation_type = 'has_supertag';",
            )
            .bind(("node_uuid", node_uuid.to_string()))
            .bind(("tag_uuid", tag_uuid.to_string()))
            .await
            .context("failed to query membership")?;
        let rows: Vec<SurrealOrdRow> =
            response.take(0).context("failed to extract membership rows")?;
        Ok(!rows.is_empty())
    }

    /// Create a membership edge and emit `supertag:added`. Callers have
    /// already resolved the tag and checked for duplicates.
    async fn insert_membership(&self, node_uuid: &str, tag: &SupertagDef) -> StoreResult<()> {
        let mut response = self
            .db
            .query(
                "SELECT ord FROM relates
                 WHERE in.uuid = $node_uuid AND relation_type = 'has_supertag'
                 ORDER BY ord DESC LIMIT 1;",
            )
            .bind(("node_uuid", node_uuid.to_string()))
            .await
            .context("failed to query membership ord")?;
        let rows: Vec<SurrealOrdRow> =
            response.take(0).context("failed to extract ord rows")?;
        let next_ord = rows.first().map(|r| r.ord + 1).unwrap_or(0);

        let now = Utc::now();
        self.db
            .query(
                "RELATE (type::thing('node', $node_uuid))->relates->(type::thing('supertag', $tag_uuid))
                 SET relation_type = 'has_supertag', ord = $ord, created_at = $created_at;",
            )
            .bind(("node_uuid", node_uuid.to_string()))
            .bind(("tag_uuid", tag.node_id.clone()))
            .bind(("ord", next_ord))
            .bind(("created_at", now.to_rfc3339()))
            .await
            .context("failed to create membership edge")?
            .check()
            .context("failed to apply membership edge")?;

        self.bus.emit(&MutationEvent::SupertagAdded {
            node_id: node_uuid.to_string(),
            supertag_system_id: tag.system_id.clone(),
            timestamp: now,
        });
        Ok(())
    }
}

#[async_trait]
impl NodeStore for SurrealStore {
    async fn create_node(&self, options: CreateNodeOptions) -> StoreResult<String> {
        if let Some(system_id) = &options.system_id {
            if self.find_node_by_system_id(system_id).await?.is_some() {
                return Err(StoreError::duplicate_system_id(system_id));
            }
        }

        // Resolve the supertag before any write so an unknown tag fails the
        // whole operation.
        let tag = match &options.supertag_id {
            Some(tag_system_id) => Some(
                self.supertag_by_system_id(tag_system_id)
                    .await?
                    .ok_or_else(|| StoreError::supertag_not_found(tag_system_id))?,
            ),
            None => None,
        };

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let content_plain = options.content.as_ref().map(|c| c.to_lowercase());

        self.db
            .query(
                "CREATE type::thing('node', $uuid) CONTENT {
                    uuid: $uuid,
                    content: $content,
                    content_plain: $content_plain,
                    system_id: $system_id,
                    owner_id: $owner_id,
                    created_at: $created_at,
                    updated_at: $updated_at,
                    deleted_at: NONE
                };",
            )
            .bind(("uuid", id.clone()))
            .bind(("content", options.content.clone()))
            .bind(("content_plain", content_plain))
            .bind(("system_id", options.system_id.clone()))
            .bind(("owner_id", options.owner_id.clone()))
            .bind(("created_at", now.to_rfc3339()))
            .bind(("updated_at", now.to_rfc3339()))
            .await
            .context("failed to create node record")?
            .check()
            .context("failed to apply node create")?;

        self.bus.emit(&MutationEvent::NodeCreated {
            node_id: id.clone(),
            after: options.content.clone(),
            timestamp: now,
        });

        if let Some(tag) = tag {
            self.insert_membership(&id, &tag).await?;
        }

        Ok(id)
    }

    async fn find_node_by_id(&self, id: &str) -> StoreResult<Option<NodeRecord>> {
        self.node_by_uuid(id).await
    }

    async fn find_node_by_system_id(&self, system_id: &str) -> StoreResult<Option<NodeRecord>> {
        let mut response = self
            .db
            .query("SELECT * FROM node WHERE system_id = $system_id LIMIT 1;")
            .bind(("system_id", system_id.to_string()))
            .await
            .context("failed to query node by system id")?;
        let rows: Vec<SurrealNodeRow> =
            response.take(0).context("failed to extract node rows")?;
        Ok(rows.into_iter().map(Into::into).next())
    }

    async fn update_node_content(&self, id: &str, content: &str) -> StoreResult<()> {
        let current = self.require_node(id).await?;

        let now = Utc::now();
        self.db
            .query(
                "UPDATE node SET content = $content, content_plain = $content_plain,
                    updated_at = $updated_at
                 WHERE uuid = $uuid;",
            )
            .bind(("uuid", id.to_string()))
            .bind(("content", content.to_string()))
            .bind(("content_plain", content.to_lowercase()))
            .bind(("updated_at", now.to_rfc3339()))
            .await
            .context("failed to update node content")?
            .check()
            .context("failed to apply node update")?;

        self.bus.emit(&MutationEvent::NodeUpdated {
            node_id: id.to_string(),
            before: current.content,
            after: Some(content.to_string()),
            timestamp: now,
        });
        Ok(())
    }

    async fn delete_node(&self, id: &str) -> StoreResult<()> {
        // Missing or already-deleted nodes are a silent no-op.
        let current = match self.node_by_uuid(id).await? {
            Some(record) if !record.is_deleted() => record,
            _ => return Ok(()),
        };

        let now = Utc::now();
        self.db
            .query(
                "UPDATE node SET deleted_at = $deleted_at, updated_at = $deleted_at
                 WHERE uuid = $uuid;",
            )
            .bind(("uuid", current.id.clone()))
            .bind(("deleted_at", now.to_rfc3339()))
            .await
            .context("failed to soft-delete node")?
            .check()
            .context("failed to apply soft delete")?;

        self.bus.emit(&MutationEvent::NodeDeleted {
            node_id: id.to_string(),
            timestamp: now,
        });
        Ok(())
    }

    async fn purge_node(&self, id: &str) -> StoreResult<()> {
        // Transaction keeps the record and its edges removed atomically.
        self.db
            .query(
                "BEGIN TRANSACTION;
                 DELETE props WHERE in.uuid = $uuid;
                 DELETE relates WHERE in.uuid = $uuid OR out.uuid = $uuid;
                 DELETE FROM node WHERE uuid = $uuid;
                 COMMIT TRANSACTION;",
            )
            .bind(("uuid", id.to_string()))
            .await
            .context("failed to purge node and edges")?
            .check()
            .context("failed to apply purge")?;
        Ok(())
    }

    async fn list_nodes(&self, include_deleted: bool) -> StoreResult<Vec<NodeRecord>> {
        let sql = if include_deleted {
            "SELECT * FROM node ORDER BY uuid ASC;"
        } else {
            "SELECT * FROM node WHERE deleted_at = NONE ORDER BY uuid ASC;"
        };
        let mut response = self.db.query(sql).await.context("failed to list nodes")?;
        let rows: Vec<SurrealNodeRow> =
            response.take(0).context("failed to extract node rows")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn search_nodes_by_content(
        &self,
        query: &str,
        case_sensitive: bool,
    ) -> StoreResult<Vec<NodeRecord>> {
        let (sql, needle) = if case_sensitive {
            (
                "SELECT * FROM node
                 WHERE deleted_at = NONE AND string::contains(content ?? '', $needle)
                 ORDER BY uuid ASC;",
                query.to_string(),
            )
        } else {
            (
                "SELECT * FROM node
                 WHERE deleted_at = NONE AND string::contains(content_plain ?? '', $needle)
                 ORDER BY uuid ASC;",
                query.to_lowercase(),
            )
        };
        let mut response = self
            .db
            .query(sql)
            .bind(("needle", needle))
            .await
            .context("failed to search nodes by content")?;
        let rows: Vec<SurrealNodeRow> =
            response.take(0).context("failed to extract node rows")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn assemble_node(&self, id: &str) -> StoreResult<Option<AssembledNode>> {
        let Some(record) = self.node_by_uuid(id).await? else {
            return Ok(None);
        };
        if record.is_deleted() {
            return Ok(None);
        }

        let bindings = self.get_property_bindings(id).await?;
        let supertags = self.get_node_supertags(id).await?;
        Ok(Some(assembler::assemble(record, bindings, supertags)))
    }

    async fn get_property_bindings(&self, node_id: &str) -> StoreResult<Vec<PropertyBinding>> {
        let mut response = self
            .db
            .query(
                "SELECT ord, value,
                        out.uuid AS field_node_id,
                        out.system_id AS field_system_id,
                        out.name AS field_name,
                        out.value_type AS value_type
                 FROM props WHERE in.uuid = $uuid;",
            )
            .bind(("uuid", node_id.to_string()))
            .await
            .context("failed to query property edges")?;
        let mut rows: Vec<SurrealBindingRow> =
            response.take(0).context("failed to extract property edges")?;

        // Same exposure order as the relational backend: field name, then
        // value order.
        rows.sort_by(|a, b| {
            a.field_name
                .cmp(&b.field_name)
                .then_with(|| a.ord.cmp(&b.ord))
        });

        let mut bindings = Vec::with_capacity(rows.len());
        for row in rows {
            let value_type = ValueType::parse(&row.value_type).ok_or_else(|| {
                StoreError::engine(format!(
                    "unknown value_type '{}' in props edge",
                    row.value_type
                ))
            })?;
            bindings.push(PropertyBinding {
                field_node_id: row.field_node_id,
                field_system_id: row.field_system_id,
                field_name: row.field_name,
                value: PropertyValue::from_json(value_type, row.value),
                order: row.ord,
            });
        }
        Ok(bindings)
    }

    async fn create_field(
        &self,
        system_id: &str,
        name: &str,
        value_type: ValueType,
    ) -> StoreResult<String> {
        if self.field_by_system_id(system_id).await?.is_some() {
            return Err(StoreError::duplicate_system_id(system_id));
        }

        let id = Uuid::new_v4().to_string();
        self.db
            .query(
                "CREATE type::thing('field', $uuid) CONTENT {
                    uuid: $uuid,
                    system_id: $system_id,
                    name: $name,
                    value_type: $value_type,
                    created_at: $created_at
                };",
            )
            .bind(("uuid", id.clone()))
            .bind(("system_id", system_id.to_string()))
            .bind(("name", name.to_string()))
            .bind(("value_type", value_type.as_str().to_string()))
            .bind(("created_at", Utc::now().to_rfc3339()))
            .await
            .context("failed to create field record")?
            .check()
            .context("failed to apply field create")?;
        Ok(id)
    }

    async fn find_field_by_system_id(&self, system_id: &str) -> StoreResult<Option<FieldDef>> {
        self.field_by_system_id(system_id).await
    }

    async fn set_property(
        &self,
        node_id: &str,
        field_system_id: &str,
        value: PropertyValue,
    ) -> StoreResult<()> {
        let field = self.require_field(field_system_id).await?;
        self.require_node(node_id).await?;

        let now = Utc::now();
        self.db
            .query(
                "DELETE props WHERE in.uuid = $node_uuid AND out.uuid = $field_uuid;
                 RELATE (type::thing('node', $node_uuid))->props->(type::thing('field', $field_uuid))
                 SET value = $value, ord = 0, created_at = $ts, updated_at = $ts;",
            )
            .bind(("node_uuid", node_id.to_string()))
            .bind(("field_uuid", field.node_id.clone()))
            .bind(("value", value.to_json()))
            .bind(("ts", now.to_rfc3339()))
            .await
            .context("failed to replace property edge")?
            .check()
            .context("failed to apply property replace")?;

        self.bus.emit(&MutationEvent::PropertySet {
            node_id: node_id.to_string(),
            field_system_id: field_system_id.to_string(),
            timestamp: now,
        });
        Ok(())
    }

    async fn add_property_value(
        &self,
        node_id: &str,
        field_system_id: &str,
        value: PropertyValue,
    ) -> StoreResult<()> {
        let field = self.require_field(field_system_id).await?;
        self.require_node(node_id).await?;

        // Read-modify-write on the next ord; racing appenders are an
        // engine-delegated concern.
        let mut response = self
            .db
            .query(
                "SELECT ord FROM props
                 WHERE in.uuid = $node_uuid AND out.uuid = $field_uuid
                 ORDER BY ord DESC LIMIT 1;",
            )
            .bind(("node_uuid", node_id.to_string()))
            .bind(("field_uuid", field.node_id.clone()))
            .await
            .context("failed to query property ord")?;
        let rows: Vec<SurrealOrdRow> =
            response.take(0).context("failed to extract ord rows")?;
        let next_ord = rows.first().map(|r| r.ord + 1).unwrap_or(0);

        let now = Utc::now();
        self.db
            .query(
                "RELATE (type::thing('node', $node_uuid))->props->(type::thing('field', $field_uuid))
                 SET value = $value, ord = $ord, created_at = $ts, updated_at = $ts;",
            )
            .bind(("node_uuid", node_id.to_string()))
            .bind(("field_uuid", field.node_id.clone()))
            .bind(("value", value.to_json()))
            .bind(("ord", next_ord))
            .bind(("ts", now.to_rfc3339()))
            .await
            .context("failed to append property edge")?
            .check()
            .context("failed to apply property append")?;

        self.bus.emit(&MutationEvent::PropertyAdded {
            node_id: node_id.to_string(),
            field_system_id: field_system_id.to_string(),
            timestamp: now,
        });
        Ok(())
    }

    async fn clear_property(&self, node_id: &str, field_system_id: &str) -> StoreResult<()> {
        let field = self.require_field(field_system_id).await?;
        self.require_node(node_id).await?;

        let mut response = self
            .db
            .query(
                "SELECT ord FROM props
                 WHERE in.uuid = $node_uuid AND out.uuid = $field_uuid;",
            )
            .bind(("node_uuid", node_id.to_string()))
            .bind(("field_uuid", field.node_id.clone()))
            .await
            .context("failed to query property edges")?;
        let existing: Vec<SurrealOrdRow> =
            response.take(0).context("failed to extract ord rows")?;
        if existing.is_empty() {
            return Ok(());
        }

        self.db
            .query("DELETE props WHERE in.uuid = $node_uuid AND out.uuid = $field_uuid;")
            .bind(("node_uuid", node_id.to_string()))
            .bind(("field_uuid", field.node_id.clone()))
            .await
            .context("failed to clear property edges")?
            .check()
            .context("failed to apply property clear")?;

        self.bus.emit(&MutationEvent::PropertyRemoved {
            node_id: node_id.to_string(),
            field_system_id: field_system_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn create_supertag(&self, spec: SupertagSpec) -> StoreResult<String> {
        if self.supertag_by_system_id(&spec.system_id).await?.is_some() {
            return Err(StoreError::duplicate_system_id(&spec.system_id));
        }

        let id = Uuid::new_v4().to_string();
        let field_schema = serde_json::to_value(&spec.field_schema)
            .context("failed to serialize field_schema")?;

        self.db
            .query(
                "CREATE type::thing('supertag', $uuid) CONTENT {
                    uuid: $uuid,
                    system_id: $system_id,
                    name: $name,
                    extends: $extends,
                    field_schema: $field_schema,
                    created_at: $created_at
                };",
            )
            .bind(("uuid", id.clone()))
            .bind(("system_id", spec.system_id.clone()))
            .bind(("name", spec.name.clone()))
            .bind(("extends", spec.extends.clone()))
            .bind(("field_schema", field_schema))
            .bind(("created_at", Utc::now().to_rfc3339()))
            .await
            .context("failed to create supertag record")?
            .check()
            .context("failed to apply supertag create")?;
        Ok(id)
    }

    async fn find_supertag_by_system_id(
        &self,
        system_id: &str,
    ) -> StoreResult<Option<SupertagDef>> {
        self.supertag_by_system_id(system_id).await
    }

    async fn list_supertags(&self) -> StoreResult<Vec<SupertagDef>> {
        let mut response = self
            .db
            .query("SELECT * FROM supertag ORDER BY system_id ASC;")
            .await
            .context("failed to list supertags")?;
        let rows: Vec<SurrealTagRow> =
            response.take(0).context("failed to extract supertag rows")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn add_node_supertag(
        &self,
        node_id: &str,
        supertag_system_id: &str,
    ) -> StoreResult<bool> {
        self.require_node(node_id).await?;
        let tag = self
            .supertag_by_system_id(supertag_system_id)
            .await?
            .ok_or_else(|| StoreError::supertag_not_found(supertag_system_id))?;

        if self.membership_exists(node_id, &tag.node_id).await? {
            return Ok(false);
        }

        self.insert_membership(node_id, &tag).await?;
        Ok(true)
    }

    async fn remove_node_supertag(
        &self,
        node_id: &str,
        supertag_system_id: &str,
    ) -> StoreResult<bool> {
        // An unknown supertag means the membership is absent, not an error.
        let Some(tag) = self.supertag_by_system_id(supertag_system_id).await? else {
            return Ok(false);
        };
        if !self.membership_exists(node_id, &tag.node_id).await? {
            return Ok(false);
        }

        self.db
            .query(
                "DELETE relates
                 WHERE in.uuid = $node_uuid AND out.uuid = $tag_uuid
                   AND relation_type = 'has_supertag';",
            )
            .bind(("node_uuid", node_id.to_string()))
            .bind(("tag_uuid", tag.node_id.clone()))
            .await
            .context("failed to remove membership edge")?
            .check()
            .context("failed to apply membership removal")?;

        self.bus.emit(&MutationEvent::SupertagRemoved {
            node_id: node_id.to_string(),
            supertag_system_id: supertag_system_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    async fn get_node_supertags(&self, node_id: &str) -> StoreResult<Vec<SupertagRef>> {
        let mut response = self
            .db
            .query(
                "SELECT ord, out.system_id AS system_id, out.name AS content
                 FROM relates
                 WHERE in.uuid = $uuid AND relation_type = 'has_supertag'
                 ORDER BY ord ASC;",
            )
            .bind(("uuid", node_id.to_string()))
            .await
            .context("failed to query memberships")?;
        let rows: Vec<SurrealMembershipRow> =
            response.take(0).context("failed to extract memberships")?;

        Ok(rows
            .into_iter()
            .map(|row| SupertagRef {
                system_id: row.system_id,
                content: row.content,
                order: row.ord,
            })
            .collect())
    }

    async fn get_nodes_by_supertags(
        &self,
        supertag_system_ids: &[String],
        match_all: bool,
    ) -> StoreResult<Vec<NodeRecord>> {
        if supertag_system_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = self
            .db
            .query(
                "SELECT in.uuid AS node_uuid, out.system_id AS tag_system_id
                 FROM relates
                 WHERE relation_type = 'has_supertag' AND out.system_id IN $tags;",
            )
            .bind(("tags", supertag_system_ids.to_vec()))
            .await
            .context("failed to query tagged nodes")?;
        let rows: Vec<SurrealTaggedRow> =
            response.take(0).context("failed to extract tagged rows")?;

        // Group memberships per node, then resolve records one by one
        // (dropping soft-deleted nodes along the way).
        let mut tags_per_node: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for row in rows {
            tags_per_node
                .entry(row.node_uuid)
                .or_default()
                .insert(row.tag_system_id);
        }

        let distinct: BTreeSet<&String> = supertag_system_ids.iter().collect();
        let mut nodes = Vec::new();
        for (node_uuid, held) in tags_per_node {
            if match_all && held.len() < distinct.len() {
                continue;
            }
            if let Some(record) = self.node_by_uuid(&node_uuid).await? {
                if !record.is_deleted() {
                    nodes.push(record);
                }
            }
        }
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn add_relation(
        &self,
        from_id: &str,
        to_id: &str,
        kind: RelationKind,
    ) -> StoreResult<bool> {
        let mut response = self
            .db
            .query(
                "SELECT ord FROM relates
                 WHERE in.uuid = $from_uuid AND out.uuid = $to_uuid
                   AND relation_type = $kind;",
            )
            .bind(("from_uuid", from_id.to_string()))
            .bind(("to_uuid", to_id.to_string()))
            .bind(("kind", kind.as_str().to_string()))
            .await
            .context("failed to query relation")?;
        let existing: Vec<SurrealOrdRow> =
            response.take(0).context("failed to extract relation rows")?;
        if !existing.is_empty() {
            return Ok(false);
        }

        self.db
            .query(
                "RELATE (type::thing('node', $from_uuid))->relates->(type::thing('node', $to_uuid))
                 SET relation_type = $kind, ord = 0, created_at = $created_at;",
            )
            .bind(("from_uuid", from_id.to_string()))
            .bind(("to_uuid", to_id.to_string()))
            .bind(("kind", kind.as_str().to_string()))
            .bind(("created_at", Utc::now().to_rfc3339()))
            .await
            .context("failed to create relation edge")?
            .check()
            .context("failed to apply relation edge")?;
        Ok(true)
    }

    async fn remove_relation(
        &self,
        from_id: &str,
        to_id: &str,
        kind: RelationKind,
    ) -> StoreResult<bool> {
        let mut response = self
            .db
            .query(
                "SELECT ord FROM relates
                 WHERE in.uuid = $from_uuid AND out.uuid = $to_uuid
                   AND relation_type = $kind;",
            )
            .bind(("from_uuid", from_id.to_string()))
            .bind(("to_uuid", to_id.to_string()))
            .bind(("kind", kind.as_str().to_string()))
            .await
            .context("failed to query relation")?;
        let existing: Vec<SurrealOrdRow> =
            response.take(0).context("failed to extract relation rows")?;
        if existing.is_empty() {
            return Ok(false);
        }

        self.db
            .query(
                "DELETE relates
                 WHERE in.uuid = $from_uuid AND out.uuid = $to_uuid
                   AND relation_type = $kind;",
            )
            .bind(("from_uuid", from_id.to_string()))
            .bind(("to_uuid", to_id.to_string()))
            .bind(("kind", kind.as_str().to_string()))
            .await
            .context("failed to remove relation edge")?
            .check()
            .context("failed to apply relation removal")?;
        Ok(true)
    }

    async fn get_outgoing_relations(
        &self,
        node_id: &str,
        kind: RelationKind,
    ) -> StoreResult<Vec<String>> {
        let mut response = self
            .db
            .query(
                "SELECT ord, out.uuid AS other FROM relates
                 WHERE in.uuid = $uuid AND relation_type = $kind;",
            )
            .bind(("uuid", node_id.to_string()))
            .bind(("kind", kind.as_str().to_string()))
            .await
            .context("failed to query outgoing relations")?;
        let mut rows: Vec<SurrealEndpointRow> =
            response.take(0).context("failed to extract endpoints")?;
        rows.sort_by(|a, b| a.ord.cmp(&b.ord).then_with(|| a.other.cmp(&b.other)));
        Ok(rows.into_iter().map(|r| r.other).collect())
    }

    async fn get_incoming_relations(
        &self,
        node_id: &str,
        kind: RelationKind,
    ) -> StoreResult<Vec<String>> {
        let mut response = self
            .db
            .query(
                "SELECT ord, in.uuid AS other FROM relates
                 WHERE out.uuid = $uuid AND relation_type = $kind;",
            )
            .bind(("uuid", node_id.to_string()))
            .bind(("kind", kind.as_str().to_string()))
            .await
            .context("failed to query incoming relations")?;
        let mut rows: Vec<SurrealEndpointRow> =
            response.take(0).context("failed to extract endpoints")?;
        rows.sort_by(|a, b| a.ord.cmp(&b.ord).then_with(|| a.other.cmp(&b.other)));
        Ok(rows.into_iter().map(|r| r.other).collect())
    }

    async fn save(&self) -> StoreResult<()> {
        // RocksDB persists eagerly; the durability hook is a safe no-op.
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

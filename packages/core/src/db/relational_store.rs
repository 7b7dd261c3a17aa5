//! RelationalStore - NodeStore Implementation for the libsql Backend
//!
//! Flat relational rendition of the store contract: nodes, field and
//! supertag definitions each live in their own table, property bindings and
//! relations are plain rows, and every lookup is an indexed SQL query.
//!
//! # Design Principles
//!
//! 1. **Embedded libsql**: local SQLite-compatible file, WAL mode, foreign
//!    keys on.
//! 2. **One table per concern**: `nodes`, `fields`, `supertags`,
//!    `node_properties`, `relations` (discriminated by `relation_type` -
//!    supertag membership is `has_supertag`, generic semantic edges share
//!    the table).
//! 3. **JSON value column**: property values are stored as raw JSON text and
//!    decoded against the field's declared type on read.
//! 4. **Events after commit**: every mutation emits on the injected
//!    [`MutationBus`] only after its statement succeeded.

use crate::db::assembler;
use crate::db::error::{StoreError, StoreResult};
use crate::db::events::{MutationBus, MutationEvent};
use crate::db::node_store::NodeStore;
use crate::models::{
    AssembledNode, CreateNodeOptions, FieldDef, NodeRecord, PropertyBinding, PropertyValue,
    RelationKind, SupertagDef, SupertagRef, SupertagSpec, ValueType,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Builder, Connection, Database, Row};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

const NODE_COLUMNS: &str =
    "id, content, content_plain, system_id, owner_id, created_at, updated_at, deleted_at";

/// RelationalStore implements the NodeStore trait over an embedded libsql
/// database.
pub struct RelationalStore {
    /// libsql database handle (wrapped in Arc for sharing)
    db: Arc<Database>,

    /// Path to the database file
    db_path: PathBuf,

    /// Injected mutation event bus
    bus: Arc<MutationBus>,
}

impl RelationalStore {
    /// Open (or create) the database at `db_path` and initialize the schema.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the parent directory cannot be created,
    /// the connection fails or schema initialization fails.
    pub async fn new(db_path: PathBuf, bus: Arc<MutationBus>) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::engine(format!(
                        "failed to create parent directory for {}: {}",
                        db_path.display(),
                        e
                    ))
                })?;
            }
        }

        let db = Builder::new_local(&db_path).build().await.map_err(|e| {
            StoreError::engine(format!(
                "failed to open database at {}: {}",
                db_path.display(),
                e
            ))
        })?;

        let store = Self {
            db: Arc::new(db),
            db_path,
            bus,
        };
        store.initialize_schema().await?;

        tracing::debug!(
            "relational store ready at {}",
            store.db_path.display()
        );
        Ok(store)
    }

    /// Open a connection with the busy timeout applied.
    ///
    /// A fresh connection per operation keeps SQLite happy when Tokio moves
    /// futures between threads; the busy timeout makes concurrent writers
    /// wait instead of failing immediately on a lock.
    async fn connect(&self) -> StoreResult<Connection> {
        let conn = self
            .db
            .connect()
            .map_err(|e| StoreError::engine(format!("failed to connect: {}", e)))?;
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        Ok(conn)
    }

    /// Execute a PRAGMA statement.
    ///
    /// PRAGMA statements return rows, so query() is required over execute().
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> StoreResult<()> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            StoreError::engine(format!("failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            StoreError::engine(format!("failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Create tables and indexes (idempotent, safe to call on every open).
    async fn initialize_schema(&self) -> StoreResult<()> {
        let conn = self.connect().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON").await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                content TEXT,
                content_plain TEXT,
                system_id TEXT UNIQUE,
                owner_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            )",
            (),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to create nodes table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS fields (
                id TEXT PRIMARY KEY,
                system_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                value_type TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to create fields table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS supertags (
                id TEXT PRIMARY KEY,
                system_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                extends TEXT,
                field_schema TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to create supertags table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS node_properties (
                node_id TEXT NOT NULL,
                field_id TEXT NOT NULL,
                value TEXT NOT NULL,
                ord INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (field_id) REFERENCES fields(id) ON DELETE CASCADE
            )",
            (),
        )
        .await
        .map_err(|e| {
            StoreError::engine(format!("failed to create node_properties table: {}", e))
        })?;

        // Polymorphic edge table: to_id may reference a node or a supertag
        // definition depending on relation_type, so no foreign keys here.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS relations (
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                relation_type TEXT NOT NULL,
                ord INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                PRIMARY KEY (from_id, to_id, relation_type)
            )",
            (),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to create relations table: {}", e)))?;

        for (name, sql) in [
            (
                "idx_nodes_content_plain",
                "CREATE INDEX IF NOT EXISTS idx_nodes_content_plain ON nodes(content_plain)",
            ),
            (
                "idx_props_node",
                "CREATE INDEX IF NOT EXISTS idx_props_node ON node_properties(node_id)",
            ),
            (
                "idx_props_field",
                "CREATE INDEX IF NOT EXISTS idx_props_field ON node_properties(field_id)",
            ),
            (
                "idx_relations_from",
                "CREATE INDEX IF NOT EXISTS idx_relations_from ON relations(from_id, relation_type)",
            ),
            (
                "idx_relations_to",
                "CREATE INDEX IF NOT EXISTS idx_relations_to ON relations(to_id, relation_type)",
            ),
        ] {
            conn.execute(sql, ()).await.map_err(|e| {
                StoreError::engine(format!("failed to create index '{}': {}", name, e))
            })?;
        }

        Ok(())
    }

    /// Parse a timestamp - handles both SQLite and RFC3339 formats.
    ///
    /// SQLite CURRENT_TIMESTAMP produces "YYYY-MM-DD HH:MM:SS"; rows written
    /// by this store carry RFC3339.
    fn parse_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Ok(naive.and_utc());
        }
        Err(StoreError::engine(format!(
            "unable to parse timestamp '{}' as RFC3339 or SQLite format",
            s
        )))
    }

    /// Convert a node row (in `NODE_COLUMNS` order) into a `NodeRecord`.
    fn row_to_node(row: &Row) -> StoreResult<NodeRecord> {
        let id: String = row
            .get(0)
            .map_err(|e| StoreError::engine(format!("failed to get id: {}", e)))?;
        let content: Option<String> = row
            .get(1)
            .map_err(|e| StoreError::engine(format!("failed to get content: {}", e)))?;
        let content_plain: Option<String> = row
            .get(2)
            .map_err(|e| StoreError::engine(format!("failed to get content_plain: {}", e)))?;
        let system_id: Option<String> = row
            .get(3)
            .map_err(|e| StoreError::engine(format!("failed to get system_id: {}", e)))?;
        let owner_id: Option<String> = row
            .get(4)
            .map_err(|e| StoreError::engine(format!("failed to get owner_id: {}", e)))?;
        let created_at_str: String = row
            .get(5)
            .map_err(|e| StoreError::engine(format!("failed to get created_at: {}", e)))?;
        let updated_at_str: String = row
            .get(6)
            .map_err(|e| StoreError::engine(format!("failed to get updated_at: {}", e)))?;
        let deleted_at_str: Option<String> = row
            .get(7)
            .map_err(|e| StoreError::engine(format!("failed to get deleted_at: {}", e)))?;

        Ok(NodeRecord {
            id,
            content,
            content_plain,
            system_id,
            owner_id,
            created_at: Self::parse_timestamp(&created_at_str)?,
            updated_at: Self::parse_timestamp(&updated_at_str)?,
            deleted_at: match deleted_at_str {
                Some(s) => Some(Self::parse_timestamp(&s)?),
                None => None,
            },
        })
    }

    /// Run a node query and collect all rows into records.
    async fn query_nodes(
        &self,
        conn: &Connection,
        sql: &str,
        params: Vec<libsql::Value>,
    ) -> StoreResult<Vec<NodeRecord>> {
        let mut stmt = conn
            .prepare(sql)
            .await
            .map_err(|e| StoreError::engine(format!("failed to prepare node query: {}", e)))?;
        let mut rows = stmt
            .query(libsql::params_from_iter(params))
            .await
            .map_err(|e| StoreError::engine(format!("failed to execute node query: {}", e)))?;

        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::engine(format!("failed to fetch node row: {}", e)))?
        {
            nodes.push(Self::row_to_node(&row)?);
        }
        Ok(nodes)
    }

    /// Resolve a field definition or fail with `FieldNotFound`.
    async fn require_field(&self, conn: &Connection, system_id: &str) -> StoreResult<FieldDef> {
        self.field_by_system_id(conn, system_id)
            .await?
            .ok_or_else(|| StoreError::field_not_found(system_id))
    }

    async fn field_by_system_id(
        &self,
        conn: &Connection,
        system_id: &str,
    ) -> StoreResult<Option<FieldDef>> {
        let mut stmt = conn
            .prepare("SELECT id, system_id, name, value_type FROM fields WHERE system_id = ?")
            .await
            .map_err(|e| StoreError::engine(format!("failed to prepare field query: {}", e)))?;
        let mut rows = stmt
            .query([system_id])
            .await
            .map_err(|e| StoreError::engine(format!("failed to execute field query: {}", e)))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::engine(format!("failed to fetch field row: {}", e)))?
        else {
            return Ok(None);
        };

        let node_id: String = row
            .get(0)
            .map_err(|e| StoreError::engine(format!("failed to get field id: {}", e)))?;
        let system_id: String = row
            .get(1)
            .map_err(|e| StoreError::engine(format!("failed to get field system_id: {}", e)))?;
        let name: String = row
            .get(2)
            .map_err(|e| StoreError::engine(format!("failed to get field name: {}", e)))?;
        let value_type_str: String = row
            .get(3)
            .map_err(|e| StoreError::engine(format!("failed to get field value_type: {}", e)))?;
        let value_type = ValueType::parse(&value_type_str).ok_or_else(|| {
            StoreError::engine(format!("unknown value_type '{}' in field row", value_type_str))
        })?;

        Ok(Some(FieldDef {
            node_id,
            system_id,
            name,
            value_type,
        }))
    }

    fn row_to_supertag(row: &Row) -> StoreResult<SupertagDef> {
        let node_id: String = row
            .get(0)
            .map_err(|e| StoreError::engine(format!("failed to get supertag id: {}", e)))?;
        let system_id: String = row
            .get(1)
            .map_err(|e| StoreError::engine(format!("failed to get supertag system_id: {}", e)))?;
        let name: String = row
            .get(2)
            .map_err(|e| StoreError::engine(format!("failed to get supertag name: {}", e)))?;
        let extends: Option<String> = row
            .get(3)
            .map_err(|e| StoreError::engine(format!("failed to get supertag extends: {}", e)))?;
        let field_schema_json: String = row
            .get(4)
            .map_err(|e| StoreError::engine(format!("failed to get field_schema: {}", e)))?;
        let field_schema = serde_json::from_str(&field_schema_json)
            .map_err(|e| StoreError::engine(format!("failed to parse field_schema: {}", e)))?;

        Ok(SupertagDef {
            node_id,
            system_id,
            name,
            extends,
            field_schema,
        })
    }

    async fn supertag_by_system_id(
        &self,
        conn: &Connection,
        system_id: &str,
    ) -> StoreResult<Option<SupertagDef>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, system_id, name, extends, field_schema
                 FROM supertags WHERE system_id = ?",
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to prepare supertag query: {}", e)))?;
        let mut rows = stmt
            .query([system_id])
            .await
            .map_err(|e| StoreError::engine(format!("failed to execute supertag query: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::engine(format!("failed to fetch supertag row: {}", e)))?
        {
            Some(row) => Ok(Some(Self::row_to_supertag(&row)?)),
            None => Ok(None),
        }
    }

    /// Resolve a node record or fail with `NodeNotFound`. Soft-deleted rows
    /// resolve: property and membership writes stay legal on them.
    async fn require_node(&self, conn: &Connection, id: &str) -> StoreResult<NodeRecord> {
        let nodes = self
            .query_nodes(
                conn,
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"),
                vec![libsql::Value::Text(id.to_string())],
            )
            .await?;
        nodes
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::node_not_found(id))
    }

    /// Insert a membership row and emit `supertag:added`. Callers have
    /// already resolved the tag and checked for duplicates.
    async fn insert_membership(
        &self,
        conn: &Connection,
        node_id: &str,
        tag: &SupertagDef,
    ) -> StoreResult<()> {
        let mut stmt = conn
            .prepare(
                "SELECT COALESCE(MAX(ord) + 1, 0) FROM relations
                 WHERE from_id = ? AND relation_type = 'has_supertag'",
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to prepare ord query: {}", e)))?;
        let mut rows = stmt
            .query([node_id])
            .await
            .map_err(|e| StoreError::engine(format!("failed to execute ord query: {}", e)))?;
        let next_ord: i64 = match rows
            .next()
            .await
            .map_err(|e| StoreError::engine(format!("failed to fetch ord row: {}", e)))?
        {
            Some(row) => row
                .get(0)
                .map_err(|e| StoreError::engine(format!("failed to get next ord: {}", e)))?,
            None => 0,
        };

        let now = Utc::now();
        conn.execute(
            "INSERT INTO relations (from_id, to_id, relation_type, ord, created_at)
             VALUES (?, ?, 'has_supertag', ?, ?)",
            (node_id, tag.node_id.as_str(), next_ord, now.to_rfc3339()),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to insert membership: {}", e)))?;

        self.bus.emit(&MutationEvent::SupertagAdded {
            node_id: node_id.to_string(),
            supertag_system_id: tag.system_id.clone(),
            timestamp: now,
        });
        Ok(())
    }
}

#[async_trait]
impl NodeStore for RelationalStore {
    async fn create_node(&self, options: CreateNodeOptions) -> StoreResult<String> {
        let conn = self.connect().await?;

        if let Some(system_id) = &options.system_id {
            if self
                .find_node_by_system_id(system_id)
                .await?
                .is_some()
            {
                return Err(StoreError::duplicate_system_id(system_id));
            }
        }

        // Resolve the supertag before any write so an unknown tag fails the
        // whole operation.
        let tag = match &options.supertag_id {
            Some(tag_system_id) => Some(
                self.supertag_by_system_id(&conn, tag_system_id)
                    .await?
                    .ok_or_else(|| StoreError::supertag_not_found(tag_system_id))?,
            ),
            None => None,
        };

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let content_plain = options.content.as_ref().map(|c| c.to_lowercase());

        conn.execute(
            "INSERT INTO nodes (id, content, content_plain, system_id, owner_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            (
                id.as_str(),
                options.content.as_deref(),
                content_plain.as_deref(),
                options.system_id.as_deref(),
                options.owner_id.as_deref(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to insert node: {}", e)))?;

        self.bus.emit(&MutationEvent::NodeCreated {
            node_id: id.clone(),
            after: options.content.clone(),
            timestamp: now,
        });

        if let Some(tag) = tag {
            self.insert_membership(&conn, &id, &tag).await?;
        }

        Ok(id)
    }

    async fn find_node_by_id(&self, id: &str) -> StoreResult<Option<NodeRecord>> {
        let conn = self.connect().await?;
        let nodes = self
            .query_nodes(
                &conn,
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"),
                vec![libsql::Value::Text(id.to_string())],
            )
            .await?;
        Ok(nodes.into_iter().next())
    }

    async fn find_node_by_system_id(&self, system_id: &str) -> StoreResult<Option<NodeRecord>> {
        let conn = self.connect().await?;
        let nodes = self
            .query_nodes(
                &conn,
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE system_id = ?"),
                vec![libsql::Value::Text(system_id.to_string())],
            )
            .await?;
        Ok(nodes.into_iter().next())
    }

    async fn update_node_content(&self, id: &str, content: &str) -> StoreResult<()> {
        let conn = self.connect().await?;
        let current = self.require_node(&conn, id).await?;

        let now = Utc::now();
        conn.execute(
            "UPDATE nodes SET content = ?, content_plain = ?, updated_at = ? WHERE id = ?",
            (content, content.to_lowercase(), now.to_rfc3339(), id),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to update node content: {}", e)))?;

        self.bus.emit(&MutationEvent::NodeUpdated {
            node_id: id.to_string(),
            before: current.content,
            after: Some(content.to_string()),
            timestamp: now,
        });
        Ok(())
    }

    async fn delete_node(&self, id: &str) -> StoreResult<()> {
        let conn = self.connect().await?;
        let now = Utc::now();

        let affected = conn
            .execute(
                "UPDATE nodes SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
                (now.to_rfc3339(), now.to_rfc3339(), id),
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to delete node: {}", e)))?;

        // Missing or already-deleted nodes are a silent no-op.
        if affected > 0 {
            self.bus.emit(&MutationEvent::NodeDeleted {
                node_id: id.to_string(),
                timestamp: now,
            });
        }
        Ok(())
    }

    async fn purge_node(&self, id: &str) -> StoreResult<()> {
        let conn = self.connect().await?;

        conn.execute("DELETE FROM node_properties WHERE node_id = ?", [id])
            .await
            .map_err(|e| StoreError::engine(format!("failed to purge properties: {}", e)))?;
        conn.execute(
            "DELETE FROM relations WHERE from_id = ? OR to_id = ?",
            (id, id),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to purge relations: {}", e)))?;
        conn.execute("DELETE FROM nodes WHERE id = ?", [id])
            .await
            .map_err(|e| StoreError::engine(format!("failed to purge node: {}", e)))?;

        Ok(())
    }

    async fn list_nodes(&self, include_deleted: bool) -> StoreResult<Vec<NodeRecord>> {
        let conn = self.connect().await?;
        let sql = if include_deleted {
            format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY id")
        } else {
            format!("SELECT {NODE_COLUMNS} FROM nodes WHERE deleted_at IS NULL ORDER BY id")
        };
        self.query_nodes(&conn, &sql, Vec::new()).await
    }

    async fn search_nodes_by_content(
        &self,
        query: &str,
        case_sensitive: bool,
    ) -> StoreResult<Vec<NodeRecord>> {
        let conn = self.connect().await?;
        // instr() keeps substring matching byte-exact; LIKE would be
        // case-insensitive for ASCII regardless of the flag.
        let (sql, needle) = if case_sensitive {
            (
                format!(
                    "SELECT {NODE_COLUMNS} FROM nodes
                     WHERE deleted_at IS NULL AND content IS NOT NULL AND instr(content, ?) > 0
                     ORDER BY id"
                ),
                query.to_string(),
            )
        } else {
            (
                format!(
                    "SELECT {NODE_COLUMNS} FROM nodes
                     WHERE deleted_at IS NULL AND content_plain IS NOT NULL
                       AND instr(content_plain, ?) > 0
                     ORDER BY id"
                ),
                query.to_lowercase(),
            )
        };
        self.query_nodes(&conn, &sql, vec![libsql::Value::Text(needle)])
            .await
    }

    async fn assemble_node(&self, id: &str) -> StoreResult<Option<AssembledNode>> {
        let Some(record) = self.find_node_by_id(id).await? else {
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
        let conn = self.connect().await?;
        let mut stmt = conn
            .prepare(
                "SELECT f.id, f.system_id, f.name, f.value_type, p.value, p.ord
                 FROM node_properties p
                 JOIN fields f ON f.id = p.field_id
                 WHERE p.node_id = ?
                 ORDER BY f.name, p.ord",
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to prepare bindings query: {}", e)))?;
        let mut rows = stmt
            .query([node_id])
            .await
            .map_err(|e| StoreError::engine(format!("failed to execute bindings query: {}", e)))?;

        let mut bindings = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::engine(format!("failed to fetch binding row: {}", e)))?
        {
            let field_node_id: String = row
                .get(0)
                .map_err(|e| StoreError::engine(format!("failed to get field id: {}", e)))?;
            let field_system_id: String = row
                .get(1)
                .map_err(|e| StoreError::engine(format!("failed to get field system_id: {}", e)))?;
            let field_name: String = row
                .get(2)
                .map_err(|e| StoreError::engine(format!("failed to get field name: {}", e)))?;
            let value_type_str: String = row
                .get(3)
                .map_err(|e| StoreError::engine(format!("failed to get value_type: {}", e)))?;
            let value_json: String = row
                .get(4)
                .map_err(|e| StoreError::engine(format!("failed to get value: {}", e)))?;
            let order: i64 = row
                .get(5)
                .map_err(|e| StoreError::engine(format!("failed to get ord: {}", e)))?;

            let value_type = ValueType::parse(&value_type_str).ok_or_else(|| {
                StoreError::engine(format!(
                    "unknown value_type '{}' in binding row",
                    value_type_str
                ))
            })?;
            let raw = serde_json::from_str(&value_json)
                .map_err(|e| StoreError::engine(format!("failed to parse value JSON: {}", e)))?;

            bindings.push(PropertyBinding {
                field_node_id,
                field_system_id,
                field_name,
                value: PropertyValue::from_json(value_type, raw),
                order,
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
        let conn = self.connect().await?;
        if self.field_by_system_id(&conn, system_id).await?.is_some() {
            return Err(StoreError::duplicate_system_id(system_id));
        }

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO fields (id, system_id, name, value_type, created_at)
             VALUES (?, ?, ?, ?, ?)",
            (
                id.as_str(),
                system_id,
                name,
                value_type.as_str(),
                Utc::now().to_rfc3339(),
            ),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to insert field: {}", e)))?;
        Ok(id)
    }

    async fn find_field_by_system_id(&self, system_id: &str) -> StoreResult<Option<FieldDef>> {
        let conn = self.connect().await?;
        self.field_by_system_id(&conn, system_id).await
    }

    async fn set_property(
        &self,
        node_id: &str,
        field_system_id: &str,
        value: PropertyValue,
    ) -> StoreResult<()> {
        let conn = self.connect().await?;
        let field = self.require_field(&conn, field_system_id).await?;
        self.require_node(&conn, node_id).await?;

        let now = Utc::now();
        let value_json = value.to_json().to_string();

        conn.execute(
            "DELETE FROM node_properties WHERE node_id = ? AND field_id = ?",
            (node_id, field.node_id.as_str()),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to clear prior values: {}", e)))?;
        conn.execute(
            "INSERT INTO node_properties (node_id, field_id, value, ord, created_at, updated_at)
             VALUES (?, ?, ?, 0, ?, ?)",
            (
                node_id,
                field.node_id.as_str(),
                value_json.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to insert property: {}", e)))?;

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
        let conn = self.connect().await?;
        let field = self.require_field(&conn, field_system_id).await?;
        self.require_node(&conn, node_id).await?;

        // Read-modify-write on the next ord; racing appenders are an
        // engine-delegated concern.
        let mut stmt = conn
            .prepare(
                "SELECT COALESCE(MAX(ord) + 1, 0) FROM node_properties
                 WHERE node_id = ? AND field_id = ?",
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to prepare ord query: {}", e)))?;
        let mut rows = stmt
            .query((node_id, field.node_id.as_str()))
            .await
            .map_err(|e| StoreError::engine(format!("failed to execute ord query: {}", e)))?;
        let next_ord: i64 = match rows
            .next()
            .await
            .map_err(|e| StoreError::engine(format!("failed to fetch ord row: {}", e)))?
        {
            Some(row) => row
                .get(0)
                .map_err(|e| StoreError::engine(format!("failed to get next ord: {}", e)))?,
            None => 0,
        };

        let now = Utc::now();
        conn.execute(
            "INSERT INTO node_properties (node_id, field_id, value, ord, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                node_id,
                field.node_id.as_str(),
                value.to_json().to_string(),
                next_ord,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to append property: {}", e)))?;

        self.bus.emit(&MutationEvent::PropertyAdded {
            node_id: node_id.to_string(),
            field_system_id: field_system_id.to_string(),
            timestamp: now,
        });
        Ok(())
    }

    async fn clear_property(&self, node_id: &str, field_system_id: &str) -> StoreResult<()> {
        let conn = self.connect().await?;
        let field = self.require_field(&conn, field_system_id).await?;
        self.require_node(&conn, node_id).await?;

        let affected = conn
            .execute(
                "DELETE FROM node_properties WHERE node_id = ? AND field_id = ?",
                (node_id, field.node_id.as_str()),
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to clear property: {}", e)))?;

        if affected > 0 {
            self.bus.emit(&MutationEvent::PropertyRemoved {
                node_id: node_id.to_string(),
                field_system_id: field_system_id.to_string(),
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    async fn create_supertag(&self, spec: SupertagSpec) -> StoreResult<String> {
        let conn = self.connect().await?;
        if self
            .supertag_by_system_id(&conn, &spec.system_id)
            .await?
            .is_some()
        {
            return Err(StoreError::duplicate_system_id(&spec.system_id));
        }

        let id = Uuid::new_v4().to_string();
        let field_schema_json = serde_json::to_string(&spec.field_schema)
            .map_err(|e| StoreError::engine(format!("failed to serialize field_schema: {}", e)))?;

        conn.execute(
            "INSERT INTO supertags (id, system_id, name, extends, field_schema, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                id.as_str(),
                spec.system_id.as_str(),
                spec.name.as_str(),
                spec.extends.as_deref(),
                field_schema_json.as_str(),
                Utc::now().to_rfc3339(),
            ),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to insert supertag: {}", e)))?;
        Ok(id)
    }

    async fn find_supertag_by_system_id(
        &self,
        system_id: &str,
    ) -> StoreResult<Option<SupertagDef>> {
        let conn = self.connect().await?;
        self.supertag_by_system_id(&conn, system_id).await
    }

    async fn list_supertags(&self) -> StoreResult<Vec<SupertagDef>> {
        let conn = self.connect().await?;
        let mut stmt = conn
            .prepare(
                "SELECT id, system_id, name, extends, field_schema
                 FROM supertags ORDER BY system_id",
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to prepare supertag list: {}", e)))?;
        let mut rows = stmt
            .query(())
            .await
            .map_err(|e| StoreError::engine(format!("failed to execute supertag list: {}", e)))?;

        let mut tags = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::engine(format!("failed to fetch supertag row: {}", e)))?
        {
            tags.push(Self::row_to_supertag(&row)?);
        }
        Ok(tags)
    }

    async fn add_node_supertag(
        &self,
        node_id: &str,
        supertag_system_id: &str,
    ) -> StoreResult<bool> {
        let conn = self.connect().await?;
        self.require_node(&conn, node_id).await?;
        let tag = self
            .supertag_by_system_id(&conn, supertag_system_id)
            .await?
            .ok_or_else(|| StoreError::supertag_not_found(supertag_system_id))?;

        let mut stmt = conn
            .prepare(
                "SELECT 1 FROM relations
                 WHERE from_id = ? AND to_id = ? AND relation_type = 'has_supertag'",
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to prepare duplicate check: {}", e)))?;
        let mut rows = stmt
            .query((node_id, tag.node_id.as_str()))
            .await
            .map_err(|e| StoreError::engine(format!("failed to execute duplicate check: {}", e)))?;
        if rows
            .next()
            .await
            .map_err(|e| StoreError::engine(format!("failed to fetch duplicate row: {}", e)))?
            .is_some()
        {
            return Ok(false);
        }

        self.insert_membership(&conn, node_id, &tag).await?;
        Ok(true)
    }

    async fn remove_node_supertag(
        &self,
        node_id: &str,
        supertag_system_id: &str,
    ) -> StoreResult<bool> {
        let conn = self.connect().await?;
        // An unknown supertag means the membership is absent, not an error.
        let Some(tag) = self.supertag_by_system_id(&conn, supertag_system_id).await? else {
            return Ok(false);
        };

        let affected = conn
            .execute(
                "DELETE FROM relations
                 WHERE from_id = ? AND to_id = ? AND relation_type = 'has_supertag'",
                (node_id, tag.node_id.as_str()),
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to remove membership: {}", e)))?;

        if affected == 0 {
            return Ok(false);
        }
        self.bus.emit(&MutationEvent::SupertagRemoved {
            node_id: node_id.to_string(),
            supertag_system_id: supertag_system_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    async fn get_node_supertags(&self, node_id: &str) -> StoreResult<Vec<SupertagRef>> {
        let conn = self.connect().await?;
        let mut stmt = conn
            .prepare(
                "SELECT s.system_id, s.name, r.ord
                 FROM relations r
                 JOIN supertags s ON s.id = r.to_id
                 WHERE r.from_id = ? AND r.relation_type = 'has_supertag'
                 ORDER BY r.ord",
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to prepare memberships: {}", e)))?;
        let mut rows = stmt
            .query([node_id])
            .await
            .map_err(|e| StoreError::engine(format!("failed to execute memberships: {}", e)))?;

        let mut refs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::engine(format!("failed to fetch membership row: {}", e)))?
        {
            let system_id: String = row
                .get(0)
                .map_err(|e| StoreError::engine(format!("failed to get tag system_id: {}", e)))?;
            let content: String = row
                .get(1)
                .map_err(|e| StoreError::engine(format!("failed to get tag name: {}", e)))?;
            let order: i64 = row
                .get(2)
                .map_err(|e| StoreError::engine(format!("failed to get tag ord: {}", e)))?;
            refs.push(SupertagRef {
                system_id,
                content,
                order,
            });
        }
        Ok(refs)
    }

    async fn get_nodes_by_supertags(
        &self,
        supertag_system_ids: &[String],
        match_all: bool,
    ) -> StoreResult<Vec<NodeRecord>> {
        if supertag_system_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connect().await?;

        let placeholders = vec!["?"; supertag_system_ids.len()].join(", ");
        let having = if match_all {
            // Count distinct ids so a caller passing duplicates still gets
            // AND-over-the-distinct-set semantics.
            let distinct = supertag_system_ids
                .iter()
                .collect::<std::collections::BTreeSet<_>>()
                .len();
            format!("HAVING COUNT(DISTINCT s.system_id) = {distinct}")
        } else {
            String::new()
        };
        let sql = format!(
            "SELECT n.id, n.content, n.content_plain, n.system_id, n.owner_id,
                    n.created_at, n.updated_at, n.deleted_at
             FROM nodes n
             JOIN relations r ON r.from_id = n.id AND r.relation_type = 'has_supertag'
             JOIN supertags s ON s.id = r.to_id
             WHERE s.system_id IN ({placeholders}) AND n.deleted_at IS NULL
             GROUP BY n.id
             {having}
             ORDER BY n.id"
        );

        let params = supertag_system_ids
            .iter()
            .map(|id| libsql::Value::Text(id.clone()))
            .collect();
        self.query_nodes(&conn, &sql, params).await
    }

    async fn add_relation(
        &self,
        from_id: &str,
        to_id: &str,
        kind: RelationKind,
    ) -> StoreResult<bool> {
        let conn = self.connect().await?;

        let mut stmt = conn
            .prepare("SELECT 1 FROM relations WHERE from_id = ? AND to_id = ? AND relation_type = ?")
            .await
            .map_err(|e| StoreError::engine(format!("failed to prepare relation check: {}", e)))?;
        let mut rows = stmt
            .query((from_id, to_id, kind.as_str()))
            .await
            .map_err(|e| StoreError::engine(format!("failed to execute relation check: {}", e)))?;
        if rows
            .next()
            .await
            .map_err(|e| StoreError::engine(format!("failed to fetch relation row: {}", e)))?
            .is_some()
        {
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO relations (from_id, to_id, relation_type, ord, created_at)
             VALUES (?, ?, ?, 0, ?)",
            (from_id, to_id, kind.as_str(), Utc::now().to_rfc3339()),
        )
        .await
        .map_err(|e| StoreError::engine(format!("failed to insert relation: {}", e)))?;
        Ok(true)
    }

    async fn remove_relation(
        &self,
        from_id: &str,
        to_id: &str,
        kind: RelationKind,
    ) -> StoreResult<bool> {
        let conn = self.connect().await?;
        let affected = conn
            .execute(
                "DELETE FROM relations WHERE from_id = ? AND to_id = ? AND relation_type = ?",
                (from_id, to_id, kind.as_str()),
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to remove relation: {}", e)))?;
        Ok(affected > 0)
    }

    async fn get_outgoing_relations(
        &self,
        node_id: &str,
        kind: RelationKind,
    ) -> StoreResult<Vec<String>> {
        let conn = self.connect().await?;
        let mut stmt = conn
            .prepare(
                "SELECT to_id FROM relations
                 WHERE from_id = ? AND relation_type = ?
                 ORDER BY ord, to_id",
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to prepare outgoing query: {}", e)))?;
        let mut rows = stmt
            .query((node_id, kind.as_str()))
            .await
            .map_err(|e| StoreError::engine(format!("failed to execute outgoing query: {}", e)))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::engine(format!("failed to fetch outgoing row: {}", e)))?
        {
            ids.push(
                row.get(0)
                    .map_err(|e| StoreError::engine(format!("failed to get to_id: {}", e)))?,
            );
        }
        Ok(ids)
    }

    async fn get_incoming_relations(
        &self,
        node_id: &str,
        kind: RelationKind,
    ) -> StoreResult<Vec<String>> {
        let conn = self.connect().await?;
        let mut stmt = conn
            .prepare(
                "SELECT from_id FROM relations
                 WHERE to_id = ? AND relation_type = ?
                 ORDER BY ord, from_id",
            )
            .await
            .map_err(|e| StoreError::engine(format!("failed to prepare incoming query: {}", e)))?;
        let mut rows = stmt
            .query((node_id, kind.as_str()))
            .await
            .map_err(|e| StoreError::engine(format!("failed to execute incoming query: {}", e)))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::engine(format!("failed to fetch incoming row: {}", e)))?
        {
            ids.push(
                row.get(0)
                    .map_err(|e| StoreError::engine(format!("failed to get from_id: {}", e)))?,
            );
        }
        Ok(ids)
    }

    async fn save(&self) -> StoreResult<()> {
        let conn = self.connect().await?;
        self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
            .await
    }

    async fn close(&self) -> StoreResult<()> {
        // Final checkpoint; the connection handles close on drop.
        self.save().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> anyhow::Result<(RelationalStore, TempDir)> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("test.db");
        let store = RelationalStore::new(db_path, Arc::new(MutationBus::new())).await?;
        Ok((store, temp_dir))
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(RelationalStore::parse_timestamp("2025-01-03 10:30:00").is_ok());
        assert!(RelationalStore::parse_timestamp("2025-01-03T10:30:00Z").is_ok());
        assert!(RelationalStore::parse_timestamp("2025-01-03T10:30:00+02:00").is_ok());
        assert!(RelationalStore::parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_create_and_find_node() -> anyhow::Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        let id = store
            .create_node(CreateNodeOptions {
                content: Some("Ripgrep".to_string()),
                system_id: Some("SYS.tools.ripgrep".to_string()),
                ..Default::default()
            })
            .await?;

        let by_id = store.find_node_by_id(&id).await?.unwrap();
        assert_eq!(by_id.content.as_deref(), Some("Ripgrep"));
        assert_eq!(by_id.content_plain.as_deref(), Some("ripgrep"));

        let by_system_id = store.find_node_by_system_id("SYS.tools.ripgrep").await?;
        assert_eq!(by_system_id.unwrap().id, id);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_system_id_conflicts() -> anyhow::Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        let options = CreateNodeOptions {
            system_id: Some("SYS.unique".to_string()),
            ..Default::default()
        };
        store.create_node(options.clone()).await?;

        match store.create_node(options).await {
            Err(StoreError::DuplicateSystemId { system_id }) => {
                assert_eq!(system_id, "SYS.unique");
            }
            other => panic!("expected DuplicateSystemId, got {:?}", other.map(|_| ())),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_set_property_requires_known_field() -> anyhow::Result<()> {
        let (store, _temp_dir) = create_test_store().await?;
        let id = store.create_node(CreateNodeOptions::default()).await?;

        match store
            .set_property(&id, "SYS.missing", PropertyValue::Text("x".to_string()))
            .await
        {
            Err(StoreError::FieldNotFound { system_id }) => {
                assert_eq!(system_id, "SYS.missing");
            }
            other => panic!("expected FieldNotFound, got {:?}", other.map(|_| ())),
        }
        Ok(())
    }
}

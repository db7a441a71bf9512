//! SQL statements over the node table.
//!
//! Every function runs a single statement on the connection it is handed, so
//! the same code serves auto-commit reads on a pooled connection and reads or
//! writes inside a [`NodeTx`](crate::transaction::NodeTx). Placeholders use the
//! `$N` form, which both the SQLite and PostgreSQL drivers accept. NULL is
//! never bound as a parameter; statements that need it spell it out.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::any::AnyRow;
use sqlx::{Any, AnyConnection, Decode, Row, Type};

use crate::error::{StoreError, StoreResult};
use crate::node::{NewNode, Node, NodeChanges, NodeId, NodeType, UserId};
use crate::permissions::Permissions;
use crate::schema::ROOT_NAME;

macro_rules! node_columns {
    () => {
        "id, owner_id, parent_id, name, type, content, permissions, created_at, updated_at"
    };
}

const SELECT_BY_ID: &str = concat!(
    "SELECT ",
    node_columns!(),
    " FROM filesystem_nodes WHERE id = $1"
);

const SELECT_ROOT: &str = concat!(
    "SELECT ",
    node_columns!(),
    " FROM filesystem_nodes WHERE parent_id IS NULL AND name = $1"
);

const SELECT_BY_PARENT_AND_NAME: &str = concat!(
    "SELECT ",
    node_columns!(),
    " FROM filesystem_nodes WHERE parent_id = $1 AND name = $2"
);

const SELECT_CHILDREN: &str = concat!(
    "SELECT ",
    node_columns!(),
    " FROM filesystem_nodes WHERE parent_id = $1 ORDER BY name"
);

const SELECT_OWNED_CHILD_DIR: &str = concat!(
    "SELECT ",
    node_columns!(),
    " FROM filesystem_nodes WHERE parent_id = $1 AND owner_id = $2 AND type = 'directory' \
     ORDER BY created_at LIMIT 1"
);

// Walks down from $1; UNION rather than UNION ALL so a corrupted cycle
// still terminates.
const SELECT_SUBTREE: &str = concat!(
    "WITH RECURSIVE subtree(id) AS (
        SELECT id FROM filesystem_nodes WHERE parent_id = $1
        UNION
        SELECT n.id FROM filesystem_nodes n INNER JOIN subtree s ON n.parent_id = s.id
    )
    SELECT ",
    node_columns!(),
    " FROM filesystem_nodes WHERE id IN (SELECT id FROM subtree)"
);

// Walks up from the candidate ($1) and counts hits on the ancestor ($2).
const COUNT_ANCESTRY_HITS: &str = "WITH RECURSIVE ancestry(id, parent_id) AS (
        SELECT id, parent_id FROM filesystem_nodes WHERE id = $1
        UNION
        SELECT n.id, n.parent_id FROM filesystem_nodes n INNER JOIN ancestry a ON n.id = a.parent_id
    )
    SELECT COUNT(*) AS hits FROM ancestry WHERE id = $2";

const EXISTS_CHILD: &str =
    "SELECT 1 FROM filesystem_nodes WHERE parent_id = $1 AND name = $2 LIMIT 1";

const EXISTS_ROOT_NAMESPACE: &str =
    "SELECT 1 FROM filesystem_nodes WHERE parent_id IS NULL AND name = $1 LIMIT 1";

const HAS_CHILDREN: &str = "SELECT 1 FROM filesystem_nodes WHERE parent_id = $1 LIMIT 1";

const REPARENT: &str = concat!(
    "UPDATE filesystem_nodes SET parent_id = $1, updated_at = $2 WHERE id = $3 RETURNING ",
    node_columns!()
);

const DELETE: &str = "DELETE FROM filesystem_nodes WHERE id = $1";

/// Persisted timestamp form: RFC 3339, UTC, microsecond precision.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("{column} {raw:?}: {e}")))
}

/// Read a nullable column.
///
/// The `Any` driver refuses to decode a NULL cell even into `Option<T>`, so a
/// failed decode is read as NULL.
fn nullable<T>(row: &AnyRow, column: &str) -> Option<T>
where
    T: for<'r> Decode<'r, Any> + Type<Any>,
{
    row.try_get::<Option<T>, _>(column).ok().flatten()
}

/// Convert a node row into a [`Node`].
pub(crate) fn node_from_row(row: &AnyRow) -> StoreResult<Node> {
    let id: String = row.try_get("id")?;
    let owner_id: Option<i64> = nullable(row, "owner_id");
    let parent_id: Option<String> = nullable(row, "parent_id");
    let kind: String = row.try_get("type")?;
    let permissions: String = row.try_get("permissions")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let parse_id = |raw: &str| {
        raw.parse::<NodeId>()
            .map_err(|e| StoreError::Decode(format!("node id {raw:?}: {e}")))
    };

    Ok(Node {
        id: parse_id(&id)?,
        owner_id: owner_id.map(UserId),
        parent_id: parent_id.as_deref().map(parse_id).transpose()?,
        name: row.try_get("name")?,
        kind: NodeType::from_str(&kind)
            .ok_or_else(|| StoreError::Decode(format!("node type {kind:?}")))?,
        content: nullable(row, "content"),
        permissions: permissions
            .parse::<Permissions>()
            .map_err(|e| StoreError::Decode(e.to_string()))?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn nodes_from_rows(rows: Vec<AnyRow>) -> StoreResult<Vec<Node>> {
    rows.iter().map(node_from_row).collect()
}

pub(crate) async fn find_by_id(conn: &mut AnyConnection, id: NodeId) -> StoreResult<Option<Node>> {
    let row = sqlx::query(SELECT_BY_ID)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(node_from_row).transpose()
}

pub(crate) async fn find_root(conn: &mut AnyConnection) -> StoreResult<Option<Node>> {
    let row = sqlx::query(SELECT_ROOT)
        .bind(ROOT_NAME)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(node_from_row).transpose()
}

pub(crate) async fn find_by_parent_and_name(
    conn: &mut AnyConnection,
    parent_id: NodeId,
    name: &str,
) -> StoreResult<Option<Node>> {
    let row = sqlx::query(SELECT_BY_PARENT_AND_NAME)
        .bind(parent_id.to_string())
        .bind(name.to_owned())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(node_from_row).transpose()
}

pub(crate) async fn find_children(
    conn: &mut AnyConnection,
    parent_id: NodeId,
) -> StoreResult<Vec<Node>> {
    let rows = sqlx::query(SELECT_CHILDREN)
        .bind(parent_id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    nodes_from_rows(rows)
}

pub(crate) async fn find_owned_child_dir(
    conn: &mut AnyConnection,
    parent_id: NodeId,
    owner: UserId,
) -> StoreResult<Option<Node>> {
    let row = sqlx::query(SELECT_OWNED_CHILD_DIR)
        .bind(parent_id.to_string())
        .bind(owner.0)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(node_from_row).transpose()
}

pub(crate) async fn find_subtree(conn: &mut AnyConnection, id: NodeId) -> StoreResult<Vec<Node>> {
    let rows = sqlx::query(SELECT_SUBTREE)
        .bind(id.to_string())
        .fetch_all(&mut *conn)
        .await?;
    nodes_from_rows(rows)
}

/// `parent_id = None` checks the root namespace only.
pub(crate) async fn exists(
    conn: &mut AnyConnection,
    parent_id: Option<NodeId>,
    name: &str,
) -> StoreResult<bool> {
    let row = match parent_id {
        Some(parent_id) => {
            sqlx::query(EXISTS_CHILD)
                .bind(parent_id.to_string())
                .bind(name.to_owned())
                .fetch_optional(&mut *conn)
                .await?
        }
        None => {
            sqlx::query(EXISTS_ROOT_NAMESPACE)
                .bind(name.to_owned())
                .fetch_optional(&mut *conn)
                .await?
        }
    };
    Ok(row.is_some())
}

pub(crate) async fn has_children(conn: &mut AnyConnection, id: NodeId) -> StoreResult<bool> {
    let row = sqlx::query(HAS_CHILDREN)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// True iff `candidate == ancestor` or `candidate` lies below `ancestor`.
pub(crate) async fn is_descendant(
    conn: &mut AnyConnection,
    ancestor: NodeId,
    candidate: NodeId,
) -> StoreResult<bool> {
    let row = sqlx::query(COUNT_ANCESTRY_HITS)
        .bind(candidate.to_string())
        .bind(ancestor.to_string())
        .fetch_one(&mut *conn)
        .await?;
    let hits: i64 = row.try_get("hits")?;
    Ok(hits > 0)
}

pub(crate) async fn insert(conn: &mut AnyConnection, new: NewNode) -> StoreResult<Node> {
    let id = NodeId::new();
    let now = timestamp(Utc::now());
    let permissions = new
        .permissions
        .unwrap_or_else(|| new.kind.default_permissions());
    let content = match new.kind {
        NodeType::File => Some(new.content.unwrap_or_default()),
        NodeType::Directory => None,
    };

    let mut columns = vec!["id", "name", "type", "permissions", "created_at", "updated_at"];
    if new.owner_id.is_some() {
        columns.push("owner_id");
    }
    if new.parent_id.is_some() {
        columns.push("parent_id");
    }
    if content.is_some() {
        columns.push("content");
    }
    let placeholders = (1..=columns.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO filesystem_nodes ({}) VALUES ({}) RETURNING {}",
        columns.join(", "),
        placeholders,
        node_columns!()
    );

    let mut query = sqlx::query(&sql)
        .bind(id.to_string())
        .bind(new.name)
        .bind(new.kind.as_str())
        .bind(permissions.to_string())
        .bind(now.clone())
        .bind(now);
    if let Some(owner) = new.owner_id {
        query = query.bind(owner.0);
    }
    if let Some(parent) = new.parent_id {
        query = query.bind(parent.to_string());
    }
    if let Some(content) = content {
        query = query.bind(content);
    }

    let row = query.fetch_one(&mut *conn).await?;
    node_from_row(&row)
}

/// Apply `changes` and advance `updated_at`.
pub(crate) async fn update_fields(
    conn: &mut AnyConnection,
    id: NodeId,
    changes: NodeChanges,
) -> StoreResult<Node> {
    let mut sets = Vec::new();
    let mut next = 1;
    let mut placeholder = |column: &str| {
        let set = format!("{column} = ${next}");
        next += 1;
        set
    };
    if changes.name.is_some() {
        sets.push(placeholder("name"));
    }
    if changes.content.is_some() {
        sets.push(placeholder("content"));
    }
    if changes.permissions.is_some() {
        sets.push(placeholder("permissions"));
    }
    sets.push(placeholder("updated_at"));
    let sql = format!(
        "UPDATE filesystem_nodes SET {} WHERE id = ${} RETURNING {}",
        sets.join(", "),
        next,
        node_columns!()
    );

    let mut query = sqlx::query(&sql);
    if let Some(name) = changes.name {
        query = query.bind(name);
    }
    if let Some(content) = changes.content {
        query = query.bind(content);
    }
    if let Some(permissions) = changes.permissions {
        query = query.bind(permissions.to_string());
    }
    let row = query
        .bind(timestamp(Utc::now()))
        .bind(id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    node_from_row(&row)
}

pub(crate) async fn reparent(
    conn: &mut AnyConnection,
    id: NodeId,
    new_parent: NodeId,
) -> StoreResult<Node> {
    let row = sqlx::query(REPARENT)
        .bind(new_parent.to_string())
        .bind(timestamp(Utc::now()))
        .bind(id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    node_from_row(&row)
}

/// Returns whether a row was removed.
pub(crate) async fn delete(conn: &mut AnyConnection, id: NodeId) -> StoreResult<bool> {
    let result = sqlx::query(DELETE)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

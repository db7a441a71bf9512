//! Filesystem engine: the public operation surface.
//!
//! Every call takes the acting user explicitly. Mutations run inside one
//! write transaction, so a rejected or cancelled call leaves the tree as it
//! was. Reads that fail a permission check report absence (`None` or
//! `NotFound`); writes that fail one report `Forbidden`.

use tracing::{debug, info, instrument};

use crate::backend::NodeStore;
use crate::config::FsConfig;
use crate::error::{FsError, Result};
use crate::node::{
    CreateNodeRequest, NewNode, Node, NodeChanges, NodeId, NodeType, TreeView, UpdateNodeRequest,
    UserId,
};
use crate::permissions::{Permissions, can_read, can_write};
use crate::resolver::{resolve, split_parent};
use crate::schema::{HOME_DIR, ROOT_NAME, SEPARATOR};
use crate::transaction::NodeTx;
use crate::tree::{materialize, presentation_order};

/// Names must be non-empty and free of the path separator.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(SEPARATOR) {
        return Err(FsError::BadRequest(format!("invalid name {name:?}")));
    }
    Ok(())
}

/// Stateless façade over a [`NodeStore`]. Clones share the store.
#[derive(Clone)]
pub struct FsEngine {
    store: NodeStore,
}

impl FsEngine {
    pub fn new(store: NodeStore) -> Self {
        Self { store }
    }

    /// Connect using `config` and, if configured, seed the system tree.
    pub async fn open(config: &FsConfig) -> Result<Self> {
        let store = NodeStore::connect(config.store_config()?, config.max_connections).await?;
        let engine = Self::new(store);
        if config.seed_on_open {
            engine.seed_system_tree().await?;
        }
        Ok(engine)
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Fetch a node. Unreadable nodes are reported as absent.
    #[instrument(skip(self))]
    pub async fn get_node_by_id(&self, user: UserId, id: NodeId) -> Result<Option<Node>> {
        let node = self.store.find_by_id(id).await?;
        Ok(node.filter(|n| can_read(n, user)))
    }

    #[instrument(skip(self))]
    pub async fn get_node_by_path(&self, user: UserId, path: &str) -> Result<Option<Node>> {
        let mut tx = self.store.begin_read().await?;
        let node = resolve(&mut tx, path, user).await?;
        tx.commit().await?;
        Ok(node)
    }

    /// Readable children of `parent_id`, or of the root when `None`.
    #[instrument(skip(self))]
    pub async fn get_children(&self, user: UserId, parent_id: Option<NodeId>) -> Result<Vec<Node>> {
        let mut tx = self.store.begin_read().await?;
        let parent_id = match parent_id {
            Some(id) => match tx.find_by_id(id).await? {
                Some(parent) if can_read(&parent, user) => parent.id,
                // Absent and unreadable look the same
                _ => return Err(FsError::Forbidden("permission denied".to_string())),
            },
            None => match tx.find_root().await? {
                Some(root) => root.id,
                None => return Ok(Vec::new()),
            },
        };
        let mut children = tx.find_children(parent_id).await?;
        tx.commit().await?;

        children.retain(|child| can_read(child, user));
        children.sort_by(presentation_order);
        Ok(children)
    }

    /// Nested view of the subtree at `id`, or of the whole tree when `None`.
    #[instrument(skip(self))]
    pub async fn get_tree(&self, user: UserId, id: Option<NodeId>) -> Result<TreeView> {
        let mut tx = self.store.begin_read().await?;
        let start = match id {
            Some(id) => tx.find_by_id(id).await?.filter(|n| can_read(n, user)),
            None => resolve(&mut tx, ROOT_NAME, user).await?,
        };
        let start = start.ok_or_else(|| FsError::NotFound("node not found".to_string()))?;
        let descendants = if start.is_dir() {
            tx.find_subtree(start.id).await?
        } else {
            Vec::new()
        };
        tx.commit().await?;

        Ok(materialize(&start, &descendants, user))
    }

    #[instrument(skip(self, request), fields(parent = ?request.parent_id, name = %request.name))]
    pub async fn create_node(&self, user: UserId, request: CreateNodeRequest) -> Result<Node> {
        let mut tx = self.store.begin().await?;
        let node = create_in(&mut tx, user, request)
            .await
            .inspect_err(|e| debug!(error = %e, "create rejected"))?;
        tx.commit().await?;
        info!(id = %node.id, kind = %node.kind, "node created");
        Ok(node)
    }

    #[instrument(skip(self, request))]
    pub async fn update_node(
        &self,
        user: UserId,
        id: NodeId,
        request: UpdateNodeRequest,
    ) -> Result<Node> {
        let mut tx = self.store.begin().await?;
        let node = update_in(&mut tx, user, id, request)
            .await
            .inspect_err(|e| debug!(error = %e, "update rejected"))?;
        tx.commit().await?;
        Ok(node)
    }

    #[instrument(skip(self))]
    pub async fn delete_node(&self, user: UserId, id: NodeId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        delete_in(&mut tx, user, id)
            .await
            .inspect_err(|e| debug!(error = %e, "delete rejected"))?;
        tx.commit().await?;
        info!("node deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn move_node(&self, user: UserId, id: NodeId, new_parent_id: NodeId) -> Result<Node> {
        let mut tx = self.store.begin().await?;
        let node = move_in(&mut tx, user, id, new_parent_id)
            .await
            .inspect_err(|e| debug!(error = %e, "move rejected"))?;
        tx.commit().await?;
        info!("node moved");
        Ok(node)
    }

    /// Save `content` at `path`: overwrite an existing file or create a new
    /// one in the parent directory.
    #[instrument(skip(self, content))]
    pub async fn write_file(&self, user: UserId, path: &str, content: String) -> Result<Node> {
        let mut tx = self.store.begin().await?;
        let node = match resolve(&mut tx, path, user).await? {
            Some(existing) if existing.is_file() => {
                update_in(&mut tx, user, existing.id, UpdateNodeRequest::content(content)).await?
            }
            Some(_) => return Err(FsError::BadRequest(format!("{path}: is a directory"))),
            None => {
                let (parent_path, name) = split_parent(path).ok_or_else(|| {
                    FsError::BadRequest("cannot write to the root directory".to_string())
                })?;
                let parent = resolve(&mut tx, &parent_path, user)
                    .await?
                    .ok_or_else(|| {
                        FsError::NotFound(format!("parent directory not found: {parent_path}"))
                    })?;
                create_in(&mut tx, user, CreateNodeRequest::file(parent.id, name, content)).await?
            }
        };
        tx.commit().await?;
        Ok(node)
    }

    /// The user's personal directory under `/home`, if provisioned.
    #[instrument(skip(self))]
    pub async fn home_directory(&self, user: UserId) -> Result<Option<Node>> {
        let mut tx = self.store.begin_read().await?;
        let Some(root) = tx.find_root().await? else {
            return Ok(None);
        };
        let Some(home) = tx.find_by_parent_and_name(root.id, HOME_DIR).await? else {
            return Ok(None);
        };
        let dir = tx.find_owned_child_dir(home.id, user).await?;
        tx.commit().await?;
        Ok(dir.filter(|d| can_read(d, user)))
    }
}

async fn create_in(tx: &mut NodeTx, user: UserId, request: CreateNodeRequest) -> Result<Node> {
    let Some(parent_id) = request.parent_id else {
        return Err(FsError::BadRequest(
            "a parent directory is required; the root already exists".to_string(),
        ));
    };

    let parent = tx
        .find_by_id(parent_id)
        .await?
        .ok_or_else(|| FsError::NotFound("parent directory not found".to_string()))?;
    if !parent.is_dir() {
        return Err(FsError::BadRequest("parent must be a directory".to_string()));
    }
    if !can_write(&parent, user) {
        return Err(FsError::Forbidden(
            "cannot write to parent directory".to_string(),
        ));
    }

    validate_name(&request.name)?;
    let permissions = request
        .permissions
        .as_deref()
        .map(str::parse::<Permissions>)
        .transpose()?;

    if tx.exists(Some(parent_id), &request.name).await? {
        let what = match request.kind {
            NodeType::Directory => "directory",
            NodeType::File => "file",
        };
        return Err(FsError::Conflict(format!(
            "{what} {:?} already exists",
            request.name
        )));
    }

    let node = tx
        .create(NewNode {
            owner_id: Some(user),
            parent_id: Some(parent_id),
            name: request.name,
            kind: request.kind,
            content: request.content,
            permissions,
        })
        .await?;
    Ok(node)
}

async fn update_in(
    tx: &mut NodeTx,
    user: UserId,
    id: NodeId,
    request: UpdateNodeRequest,
) -> Result<Node> {
    let node = tx
        .find_by_id(id)
        .await?
        .ok_or_else(|| FsError::NotFound("node not found".to_string()))?;
    if node.is_root() {
        return Err(FsError::BadRequest("cannot modify the root directory".to_string()));
    }

    // Content on a directory is dropped, not rejected
    let content = request.content.filter(|_| node.is_file());

    if (request.name.is_some() || content.is_some()) && !can_write(&node, user) {
        return Err(FsError::Forbidden("permission denied".to_string()));
    }
    if let Some(name) = &request.name {
        validate_name(name)?;
    }
    let permissions = match request.permissions {
        Some(raw) => {
            // Changing the mode is an owner capability, not a write capability
            if !node.is_owned_by(user) {
                return Err(FsError::Forbidden(
                    "only the owner can change permissions".to_string(),
                ));
            }
            Some(raw.parse::<Permissions>()?)
        }
        None => None,
    };

    let changes = NodeChanges {
        name: request.name.filter(|n| *n != node.name),
        content: content.filter(|c| node.content.as_deref() != Some(c.as_str())),
        permissions: permissions.filter(|p| *p != node.permissions),
    };
    if changes.is_empty() {
        return Ok(node);
    }

    if let (Some(name), Some(parent_id)) = (&changes.name, node.parent_id) {
        if tx.exists(Some(parent_id), name).await? {
            return Err(FsError::Conflict(format!("{name:?} already exists")));
        }
    }

    Ok(tx.update_fields(id, changes).await?)
}

async fn delete_in(tx: &mut NodeTx, user: UserId, id: NodeId) -> Result<()> {
    let node = tx
        .find_by_id(id)
        .await?
        .ok_or_else(|| FsError::NotFound("node not found".to_string()))?;
    let parent_id = match node.parent_id {
        Some(parent_id) if !node.is_root() => parent_id,
        _ => return Err(FsError::BadRequest("cannot delete the root directory".to_string())),
    };

    // Unlinking is a write on the parent, not on the node itself
    let parent = tx
        .find_by_id(parent_id)
        .await?
        .ok_or_else(|| FsError::NotFound("parent directory not found".to_string()))?;
    if !can_write(&parent, user) {
        return Err(FsError::Forbidden(
            "cannot remove from parent directory".to_string(),
        ));
    }

    if node.is_dir() && tx.has_children(id).await? {
        return Err(FsError::BadRequest(format!(
            "directory {:?} is not empty",
            node.name
        )));
    }

    tx.delete(id).await?;
    Ok(())
}

async fn move_in(tx: &mut NodeTx, user: UserId, id: NodeId, new_parent_id: NodeId) -> Result<Node> {
    let node = tx
        .find_by_id(id)
        .await?
        .ok_or_else(|| FsError::NotFound("node not found".to_string()))?;
    let destination = tx
        .find_by_id(new_parent_id)
        .await?
        .filter(Node::is_dir)
        .ok_or_else(|| FsError::BadRequest("invalid destination directory".to_string()))?;

    if let Some(source_parent_id) = node.parent_id {
        if let Some(source_parent) = tx.find_by_id(source_parent_id).await? {
            if !can_write(&source_parent, user) {
                return Err(FsError::Forbidden(
                    "cannot remove from source directory".to_string(),
                ));
            }
        }
    }
    if !can_write(&destination, user) {
        return Err(FsError::Forbidden(
            "cannot write to destination directory".to_string(),
        ));
    }

    // Also rejects moving a node into itself and moving the root anywhere
    if tx.is_descendant(id, new_parent_id).await? {
        return Err(FsError::BadRequest(
            "cannot move a directory into itself".to_string(),
        ));
    }

    if node.parent_id != Some(new_parent_id) && tx.exists(Some(new_parent_id), &node.name).await? {
        return Err(FsError::Conflict(format!(
            "{:?} already exists in destination",
            node.name
        )));
    }

    Ok(tx.reparent(id, new_parent_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("notes.txt").is_ok());
        assert!(validate_name(".hidden").is_ok());
        assert!(matches!(validate_name(""), Err(FsError::BadRequest(_))));
        assert!(matches!(validate_name("a/b"), Err(FsError::BadRequest(_))));
        assert!(matches!(validate_name("/"), Err(FsError::BadRequest(_))));
    }
}

//! Transaction handle over the node table.

use sqlx::{Any, Transaction};
use tokio::sync::OwnedMutexGuard;

use crate::error::StoreResult;
use crate::node::{NewNode, Node, NodeChanges, NodeId, UserId};
use crate::queries;

/// A store transaction carrying the node lookups and mutation primitives.
///
/// Dropping the handle without [`commit`](Self::commit) rolls the transaction
/// back, which is what happens when the owning future is cancelled or times
/// out. Write handles also hold the store's writer lock until they are
/// finished.
pub struct NodeTx {
    tx: Transaction<'static, Any>,
    // Declared after `tx` so the rollback is queued before the lock is released.
    writer: Option<OwnedMutexGuard<()>>,
}

impl NodeTx {
    pub(crate) fn new(tx: Transaction<'static, Any>, writer: Option<OwnedMutexGuard<()>>) -> Self {
        Self {
            tx,
            writer,
        }
    }

    pub fn is_writer(&self) -> bool {
        self.writer.is_some()
    }

    pub async fn find_by_id(&mut self, id: NodeId) -> StoreResult<Option<Node>> {
        queries::find_by_id(&mut self.tx, id).await
    }

    pub async fn find_root(&mut self) -> StoreResult<Option<Node>> {
        queries::find_root(&mut self.tx).await
    }

    pub async fn find_by_parent_and_name(
        &mut self,
        parent_id: NodeId,
        name: &str,
    ) -> StoreResult<Option<Node>> {
        queries::find_by_parent_and_name(&mut self.tx, parent_id, name).await
    }

    pub async fn find_children(&mut self, parent_id: NodeId) -> StoreResult<Vec<Node>> {
        queries::find_children(&mut self.tx, parent_id).await
    }

    /// First directory directly under `parent_id` owned by `owner`.
    pub async fn find_owned_child_dir(
        &mut self,
        parent_id: NodeId,
        owner: UserId,
    ) -> StoreResult<Option<Node>> {
        queries::find_owned_child_dir(&mut self.tx, parent_id, owner).await
    }

    /// Every node below `id`, in no particular order.
    pub async fn find_subtree(&mut self, id: NodeId) -> StoreResult<Vec<Node>> {
        queries::find_subtree(&mut self.tx, id).await
    }

    pub async fn exists(&mut self, parent_id: Option<NodeId>, name: &str) -> StoreResult<bool> {
        queries::exists(&mut self.tx, parent_id, name).await
    }

    pub async fn has_children(&mut self, id: NodeId) -> StoreResult<bool> {
        queries::has_children(&mut self.tx, id).await
    }

    pub async fn is_descendant(&mut self, ancestor: NodeId, candidate: NodeId) -> StoreResult<bool> {
        queries::is_descendant(&mut self.tx, ancestor, candidate).await
    }

    pub async fn create(&mut self, new: NewNode) -> StoreResult<Node> {
        queries::insert(&mut self.tx, new).await
    }

    pub async fn update_fields(&mut self, id: NodeId, changes: NodeChanges) -> StoreResult<Node> {
        queries::update_fields(&mut self.tx, id, changes).await
    }

    pub async fn reparent(&mut self, id: NodeId, new_parent: NodeId) -> StoreResult<Node> {
        queries::reparent(&mut self.tx, id, new_parent).await
    }

    pub async fn delete(&mut self, id: NodeId) -> StoreResult<bool> {
        queries::delete(&mut self.tx, id).await
    }

    pub async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

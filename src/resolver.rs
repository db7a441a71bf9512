//! Path resolution.
//!
//! A path is walked from the root one segment at a time. Traversing a
//! directory needs execute permission on it and the final node must be
//! readable. Every failure, whether the node is absent or merely
//! inaccessible, comes back as `None` so callers cannot probe for the
//! existence of paths they may not see.

use async_trait::async_trait;
use tracing::trace;

use crate::error::StoreResult;
use crate::node::{Node, NodeId, UserId};
use crate::permissions::{can_execute, can_read};
use crate::schema::{ROOT_NAME, SEPARATOR};
use crate::transaction::NodeTx;

/// Lookups the resolver needs.
#[async_trait]
pub trait NodeSource: Send {
    async fn root(&mut self) -> StoreResult<Option<Node>>;

    async fn child(&mut self, parent_id: NodeId, name: &str) -> StoreResult<Option<Node>>;
}

#[async_trait]
impl NodeSource for NodeTx {
    async fn root(&mut self) -> StoreResult<Option<Node>> {
        self.find_root().await
    }

    async fn child(&mut self, parent_id: NodeId, name: &str) -> StoreResult<Option<Node>> {
        self.find_by_parent_and_name(parent_id, name).await
    }
}

/// Non-empty segments of `path`. Leading, trailing and doubled separators
/// are ignored, so `"//home/alice/"` and `"home/alice"` are equivalent.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty())
}

/// Split `path` into its parent directory path and final name.
///
/// Returns `None` for the root, which has no parent.
pub fn split_parent(path: &str) -> Option<(String, String)> {
    let mut parts: Vec<&str> = segments(path).collect();
    let name = parts.pop()?;
    let parent = format!("{}{}", ROOT_NAME, parts.join(ROOT_NAME));
    Some((parent, name.to_string()))
}

/// Resolve `path` for `user`.
pub async fn resolve<S>(source: &mut S, path: &str, user: UserId) -> StoreResult<Option<Node>>
where
    S: NodeSource + ?Sized,
{
    let Some(mut current) = source.root().await? else {
        return Ok(None);
    };

    for segment in segments(path) {
        if !can_execute(&current, user) {
            trace!(%user, node = %current.id, "traversal denied");
            return Ok(None);
        }
        match source.child(current.id, segment).await? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }

    Ok(can_read(&current, user).then_some(current))
}

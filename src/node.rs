//! Node data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::permissions::Permissions;
use crate::schema::ROOT_NAME;

/// Opaque node identifier, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of a user, as issued by the external account store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of node. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Directory,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::File => "file",
            NodeType::Directory => "directory",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "file" => Some(NodeType::File),
            "directory" => Some(NodeType::Directory),
            _ => None,
        }
    }

    /// Permissions applied when the creator does not supply any.
    pub fn default_permissions(&self) -> Permissions {
        match self {
            NodeType::File => Permissions::FILE_DEFAULT,
            NodeType::Directory => Permissions::DIRECTORY_DEFAULT,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    /// `None` for system-provisioned nodes.
    pub owner_id: Option<UserId>,
    /// `None` only for the root.
    pub parent_id: Option<NodeId>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeType,
    /// Always `None` for directories.
    pub content: Option<String>,
    pub permissions: Permissions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none() && self.name == ROOT_NAME
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeType::File
    }

    /// Exact ownership; an owner-less node is owned by nobody.
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner_id == Some(user)
    }
}

/// Data required to insert a node.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub owner_id: Option<UserId>,
    /// `None` only when seeding the root.
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub kind: NodeType,
    pub content: Option<String>,
    /// Defaults by kind when absent.
    pub permissions: Option<Permissions>,
}

impl NewNode {
    pub fn directory(owner_id: Option<UserId>, parent_id: NodeId, name: impl Into<String>) -> Self {
        Self {
            owner_id,
            parent_id: Some(parent_id),
            name: name.into(),
            kind: NodeType::Directory,
            content: None,
            permissions: None,
        }
    }

    pub fn file(
        owner_id: Option<UserId>,
        parent_id: NodeId,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            owner_id,
            parent_id: Some(parent_id),
            name: name.into(),
            kind: NodeType::File,
            content: Some(content.into()),
            permissions: None,
        }
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = Some(permissions);
        self
    }
}

/// Field updates applied in place. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeChanges {
    pub name: Option<String>,
    pub content: Option<String>,
    pub permissions: Option<Permissions>,
}

impl NodeChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.content.is_none() && self.permissions.is_none()
    }
}

/// Body of a create call, in the wire shape clients send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeRequest {
    pub parent_id: Option<NodeId>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

impl CreateNodeRequest {
    pub fn directory(parent_id: NodeId, name: impl Into<String>) -> Self {
        Self {
            parent_id: Some(parent_id),
            name: name.into(),
            kind: NodeType::Directory,
            content: None,
            permissions: None,
        }
    }

    pub fn file(parent_id: NodeId, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            parent_id: Some(parent_id),
            name: name.into(),
            kind: NodeType::File,
            content: Some(content.into()),
            permissions: None,
        }
    }

    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = Some(permissions.into());
        self
    }
}

/// Body of a partial update call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

impl UpdateNodeRequest {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn chmod(permissions: impl Into<String>) -> Self {
        Self {
            permissions: Some(permissions.into()),
            ..Default::default()
        }
    }
}

/// Nested, permission-filtered rendering of a subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeView {
    pub id: NodeId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeType,
    pub permissions: Permissions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeView>>,
}

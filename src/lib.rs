//! # simfs - a multi-user virtual filesystem tree in SQL
//!
//! simfs stores a Unix-like tree of files and directories in a relational
//! database and enforces owner/other `rwx` permissions on every operation.
//! The acting user is always passed in explicitly; the engine holds no
//! session state.
//!
//! ## Backends
//!
//! - **SQLite**: embedded file or private in-memory database (default feature)
//! - **PostgreSQL**: remote database (`postgres` feature)
//!
//! ## Example
//!
//! ```rust,ignore
//! use simfs::{CreateNodeRequest, FsEngine, NodeStore, UserId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fs = FsEngine::new(NodeStore::in_memory().await?);
//!     fs.seed_system_tree().await?;
//!
//!     let alice = UserId(1);
//!     let home = fs.provision_home(alice, "alice").await?;
//!     fs.create_node(alice, CreateNodeRequest::file(home.id, "notes.txt", "hi"))
//!         .await?;
//!
//!     let tree = fs.get_tree(alice, Some(home.id)).await?;
//!     println!("{}", serde_json::to_string_pretty(&tree)?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod node;
pub mod permissions;
mod provision;
mod queries;
pub mod resolver;
pub mod schema;
pub mod transaction;
pub mod tree;

pub use backend::{NodeStore, StoreConfig};
pub use config::FsConfig;
pub use engine::FsEngine;
pub use error::{FsError, Result, StoreError, StoreResult};
pub use node::{
    CreateNodeRequest, NewNode, Node, NodeChanges, NodeId, NodeType, TreeView, UpdateNodeRequest,
    UserId,
};
pub use permissions::{InvalidPermissions, Permissions, Triple};
pub use transaction::NodeTx;

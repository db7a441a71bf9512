//! First-run seeding and per-user home directories.
//!
//! Both routines are safe to run concurrently and repeatedly: existing nodes
//! are left alone, a Conflict raised by a racing provisioner is treated as
//! success once the winner's nodes are visible, and a transaction that lost a
//! lock race is run again.

use std::future::Future;

use tracing::{info, instrument, warn};

use crate::engine::{FsEngine, validate_name};
use crate::error::{FsError, Result};
use crate::node::{NewNode, Node, NodeType, UserId};
use crate::permissions::Permissions;
use crate::schema::{HOME_DIR, ROOT_NAME, SYSTEM_DIRS, TMP_DIR, WELCOME_FILE, welcome_text};

const PROVISION_ATTEMPTS: u32 = 3;

/// Run `attempt` again while it fails on database contention.
async fn retry_contention<T, F, Fut>(mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut tries = 1;
    loop {
        match attempt().await {
            Err(err) if err.is_contention() && tries < PROVISION_ATTEMPTS => {
                warn!(error = %err, tries, "provisioning lost a lock race, retrying");
                tries += 1;
            }
            outcome => return outcome,
        }
    }
}

impl FsEngine {
    /// Create the owner-less root and shared top-level directories.
    ///
    /// Returns the root.
    #[instrument(skip(self))]
    pub async fn seed_system_tree(&self) -> Result<Node> {
        let store = self.store();
        let seeded = retry_contention(move || {
            store.transaction(|tx| {
                Box::pin(async move {
                    let mut created = 0;
                    let root = match tx.find_root().await? {
                        Some(root) => root,
                        None => {
                            created += 1;
                            tx.create(NewNode {
                                owner_id: None,
                                parent_id: None,
                                name: ROOT_NAME.to_string(),
                                kind: NodeType::Directory,
                                content: None,
                                permissions: Some(Permissions::DIRECTORY_DEFAULT),
                            })
                            .await?
                        }
                    };

                    for &name in SYSTEM_DIRS {
                        if tx.exists(Some(root.id), name).await? {
                            continue;
                        }
                        let permissions = if name == TMP_DIR {
                            Permissions::WORLD_WRITABLE
                        } else {
                            Permissions::DIRECTORY_DEFAULT
                        };
                        tx.create(NewNode::directory(None, root.id, name).with_permissions(permissions))
                            .await?;
                        created += 1;
                    }
                    Ok::<_, FsError>((root, created))
                })
            })
        })
        .await;

        match seeded {
            Ok((root, created)) => {
                if created > 0 {
                    info!(created, "system tree seeded");
                }
                Ok(root)
            }
            Err(err) if err.is_conflict() => {
                warn!(error = %err, "concurrent seeding detected, using existing tree");
                store
                    .find_root()
                    .await?
                    .ok_or_else(|| FsError::NotFound("root directory not found".to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Ensure `/home/<username>` exists for `user`, with a welcome file.
    ///
    /// Returns the home directory, whether it was created now or earlier.
    #[instrument(skip(self))]
    pub async fn provision_home(&self, user: UserId, username: &str) -> Result<Node> {
        validate_name(username)?;

        let store = self.store();
        let provisioned = retry_contention(move || {
            let owned = username.to_string();
            store.transaction(move |tx| {
                Box::pin(async move {
                    let root = tx.find_root().await?.ok_or_else(|| {
                        FsError::NotFound("root directory has not been seeded".to_string())
                    })?;
                    let home = tx
                        .find_by_parent_and_name(root.id, HOME_DIR)
                        .await?
                        .ok_or_else(|| FsError::NotFound("/home has not been seeded".to_string()))?;

                    if let Some(existing) = tx.find_by_parent_and_name(home.id, &owned).await? {
                        return Ok::<_, FsError>((existing, false));
                    }

                    let dir = tx
                        .create(
                            NewNode::directory(Some(user), home.id, owned.clone())
                                .with_permissions(Permissions::PRIVATE_DIRECTORY),
                        )
                        .await?;
                    tx.create(
                        NewNode::file(Some(user), dir.id, WELCOME_FILE, welcome_text(&owned))
                            .with_permissions(Permissions::FILE_DEFAULT),
                    )
                    .await?;
                    Ok((dir, true))
                })
            })
        })
        .await;

        match provisioned {
            Ok((dir, created)) => {
                if created {
                    info!(%user, path = %format!("/{HOME_DIR}/{username}"), "home directory provisioned");
                }
                Ok(dir)
            }
            Err(err) if err.is_conflict() => {
                warn!(%user, error = %err, "concurrent home provisioning detected");
                self.existing_home(username).await
            }
            Err(err) => Err(err),
        }
    }

    async fn existing_home(&self, username: &str) -> Result<Node> {
        let missing = || FsError::NotFound(format!("/{HOME_DIR}/{username} not found"));
        let store = self.store();
        let root = store.find_root().await?.ok_or_else(missing)?;
        let home = store
            .find_by_parent_and_name(root.id, HOME_DIR)
            .await?
            .ok_or_else(missing)?;
        store
            .find_by_parent_and_name(home.id, username)
            .await?
            .ok_or_else(missing)
    }
}

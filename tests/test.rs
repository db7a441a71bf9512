//! End-to-end scenarios against a seeded in-memory store.

use simfs::{
    CreateNodeRequest, FsConfig, FsEngine, FsError, Node, NodeId, NodeStore, NodeType,
    Permissions, TreeView, UpdateNodeRequest, UserId,
};

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Seeded engine with homes for alice and bob.
async fn setup() -> (FsEngine, Node, Node) {
    init_tracing();
    let fs = FsEngine::new(NodeStore::in_memory().await.unwrap());
    fs.seed_system_tree().await.unwrap();
    let alice_home = fs.provision_home(ALICE, "alice").await.unwrap();
    let bob_home = fs.provision_home(BOB, "bob").await.unwrap();
    (fs, alice_home, bob_home)
}

async fn by_path(fs: &FsEngine, user: UserId, path: &str) -> Node {
    fs.get_node_by_path(user, path)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("{path} should resolve"))
}

fn child_names(view: &TreeView) -> Vec<&str> {
    view.children
        .as_ref()
        .map(|c| c.iter().map(|v| v.name.as_str()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_create_requires_write_on_parent() {
    let (fs, alice_home, _) = setup().await;

    let doc = fs
        .create_node(ALICE, CreateNodeRequest::file(alice_home.id, "a.txt", "hello"))
        .await
        .unwrap();
    assert_eq!(doc.owner_id, Some(ALICE));
    assert_eq!(doc.permissions, Permissions::FILE_DEFAULT);

    let err = fs
        .create_node(BOB, CreateNodeRequest::file(alice_home.id, "b.txt", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::Forbidden(_)));
    assert_eq!(err.status_code(), 403);

    // Nobody owns /etc and it is not world-writable
    let etc = by_path(&fs, ALICE, "/etc").await;
    let err = fs
        .create_node(ALICE, CreateNodeRequest::directory(etc.id, "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::Forbidden(_)));

    // /tmp is world-writable
    let tmp = by_path(&fs, BOB, "/tmp").await;
    let scratch = fs
        .create_node(BOB, CreateNodeRequest::directory(tmp.id, "scratch"))
        .await
        .unwrap();
    assert_eq!(scratch.owner_id, Some(BOB));
}

#[tokio::test]
async fn test_create_then_get_round_trip() {
    let (fs, alice_home, _) = setup().await;
    let created = fs
        .create_node(
            ALICE,
            CreateNodeRequest::file(alice_home.id, "notes.md", "# notes").with_permissions("rw-------"),
        )
        .await
        .unwrap();

    let fetched = fs.get_node_by_id(ALICE, created.id).await.unwrap().unwrap();
    assert_eq!(fetched, created);
    assert_eq!(fetched.content.as_deref(), Some("# notes"));
    assert_eq!(fetched.kind, NodeType::File);
    assert_eq!(fetched.parent_id, Some(alice_home.id));

    // Private file: absent for others
    assert!(fs.get_node_by_id(BOB, created.id).await.unwrap().is_none());
    assert!(fs.get_node_by_id(ALICE, NodeId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_validation() {
    let (fs, alice_home, _) = setup().await;

    let err = fs
        .create_node(ALICE, CreateNodeRequest::file(alice_home.id, "a/b", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));

    let err = fs
        .create_node(
            ALICE,
            CreateNodeRequest::file(alice_home.id, "a.txt", "").with_permissions("rwz------"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));

    let mut orphan = CreateNodeRequest::directory(alice_home.id, "orphan");
    orphan.parent_id = None;
    let err = fs.create_node(ALICE, orphan).await.unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));

    let file = fs
        .create_node(ALICE, CreateNodeRequest::file(alice_home.id, "f.txt", ""))
        .await
        .unwrap();
    let err = fs
        .create_node(ALICE, CreateNodeRequest::file(file.id, "inner.txt", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));

    let err = fs
        .create_node(ALICE, CreateNodeRequest::directory(NodeId::new(), "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
}

#[tokio::test]
async fn test_directory_content_is_ignored() {
    let (fs, alice_home, _) = setup().await;
    let mut request = CreateNodeRequest::directory(alice_home.id, "dir");
    request.content = Some("should vanish".to_string());
    let dir = fs.create_node(ALICE, request).await.unwrap();
    assert!(dir.content.is_none());
    assert_eq!(dir.permissions, Permissions::DIRECTORY_DEFAULT);

    let same = fs
        .update_node(ALICE, dir.id, UpdateNodeRequest::content("still nothing"))
        .await
        .unwrap();
    assert!(same.content.is_none());
    assert_eq!(same.updated_at, dir.updated_at);
}

#[tokio::test]
async fn test_duplicate_name_conflicts() {
    let (fs, alice_home, _) = setup().await;
    fs.create_node(ALICE, CreateNodeRequest::directory(alice_home.id, "docs"))
        .await
        .unwrap();

    let err = fs
        .create_node(ALICE, CreateNodeRequest::file(alice_home.id, "docs", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::Conflict(_)));
    assert_eq!(err.status_code(), 409);

    // Same name under another parent is fine
    let docs = by_path(&fs, ALICE, "/home/alice/docs").await;
    fs.create_node(ALICE, CreateNodeRequest::directory(docs.id, "docs"))
        .await
        .unwrap();

    let other = fs
        .create_node(ALICE, CreateNodeRequest::file(alice_home.id, "other.txt", ""))
        .await
        .unwrap();
    let err = fs
        .update_node(ALICE, other.id, UpdateNodeRequest::rename("docs"))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::Conflict(_)));
}

#[tokio::test]
async fn test_update_fields_and_noop() {
    let (fs, alice_home, _) = setup().await;
    let file = fs
        .create_node(ALICE, CreateNodeRequest::file(alice_home.id, "a.txt", "one"))
        .await
        .unwrap();

    // Nothing differs: untouched, timestamp included
    let same = fs
        .update_node(
            ALICE,
            file.id,
            UpdateNodeRequest {
                name: Some("a.txt".to_string()),
                content: Some("one".to_string()),
                permissions: Some("rw-r--r--".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(same, file);
    let same = fs
        .update_node(ALICE, file.id, UpdateNodeRequest::default())
        .await
        .unwrap();
    assert_eq!(same.updated_at, file.updated_at);

    std::thread::sleep(std::time::Duration::from_millis(5));
    let renamed = fs
        .update_node(
            ALICE,
            file.id,
            UpdateNodeRequest {
                name: Some("b.txt".to_string()),
                content: Some("two".to_string()),
                permissions: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.name, "b.txt");
    assert_eq!(renamed.content.as_deref(), Some("two"));
    assert_eq!(renamed.created_at, file.created_at);
    assert!(renamed.updated_at > file.updated_at);
    assert!(fs.get_node_by_path(ALICE, "/home/alice/a.txt").await.unwrap().is_none());
    assert_eq!(by_path(&fs, ALICE, "/home/alice/b.txt").await.id, file.id);

    let err = fs
        .update_node(ALICE, NodeId::new(), UpdateNodeRequest::rename("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
}

#[tokio::test]
async fn test_only_owner_can_chmod() {
    let (fs, _, _) = setup().await;
    let tmp = by_path(&fs, ALICE, "/tmp").await;
    let shared = fs
        .create_node(
            ALICE,
            CreateNodeRequest::file(tmp.id, "shared.txt", "").with_permissions("rw-rw-rw-"),
        )
        .await
        .unwrap();

    // Others may write the content...
    let edited = fs
        .update_node(BOB, shared.id, UpdateNodeRequest::content("bob was here"))
        .await
        .unwrap();
    assert_eq!(edited.content.as_deref(), Some("bob was here"));

    // ...but not change the mode
    let err = fs
        .update_node(BOB, shared.id, UpdateNodeRequest::chmod("rwxrwxrwx"))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::Forbidden(_)));

    let locked = fs
        .update_node(ALICE, shared.id, UpdateNodeRequest::chmod("rw-------"))
        .await
        .unwrap();
    assert_eq!(locked.permissions.to_string(), "rw-------");

    let err = fs
        .update_node(BOB, shared.id, UpdateNodeRequest::content("again"))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::Forbidden(_)));

    let err = fs
        .update_node(ALICE, shared.id, UpdateNodeRequest::chmod("rwxrwxrwxr"))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));
}

#[tokio::test]
async fn test_root_is_immutable() {
    let (fs, _, _) = setup().await;
    let root = by_path(&fs, ALICE, "/").await;
    assert!(root.is_root());

    let err = fs
        .update_node(ALICE, root.id, UpdateNodeRequest::rename("root"))
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));

    let err = fs.delete_node(ALICE, root.id).await.unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));

    let tmp = by_path(&fs, ALICE, "/tmp").await;
    let err = fs.move_node(ALICE, root.id, tmp.id).await.unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));
}

#[tokio::test]
async fn test_delete() {
    let (fs, alice_home, _) = setup().await;
    let docs = fs
        .create_node(ALICE, CreateNodeRequest::directory(alice_home.id, "docs"))
        .await
        .unwrap();
    let note = fs
        .create_node(ALICE, CreateNodeRequest::file(docs.id, "note.txt", ""))
        .await
        .unwrap();

    let err = fs.delete_node(ALICE, docs.id).await.unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));
    assert!(fs.get_node_by_id(ALICE, note.id).await.unwrap().is_some());

    let err = fs.delete_node(BOB, note.id).await.unwrap_err();
    assert!(matches!(err, FsError::Forbidden(_)));

    fs.delete_node(ALICE, note.id).await.unwrap();
    fs.delete_node(ALICE, docs.id).await.unwrap();
    assert!(fs.get_node_by_id(ALICE, docs.id).await.unwrap().is_none());

    let err = fs.delete_node(ALICE, docs.id).await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
}

#[tokio::test]
async fn test_move_rejects_cycles() {
    let (fs, alice_home, _) = setup().await;
    let a = fs
        .create_node(ALICE, CreateNodeRequest::directory(alice_home.id, "a"))
        .await
        .unwrap();
    let b = fs
        .create_node(ALICE, CreateNodeRequest::directory(a.id, "b"))
        .await
        .unwrap();
    let c = fs
        .create_node(ALICE, CreateNodeRequest::directory(b.id, "c"))
        .await
        .unwrap();

    // Moving within the same branch is fine
    let moved = fs.move_node(ALICE, c.id, a.id).await.unwrap();
    assert_eq!(moved.parent_id, Some(a.id));
    let moved = fs.move_node(ALICE, c.id, b.id).await.unwrap();
    assert_eq!(moved.parent_id, Some(b.id));

    let err = fs.move_node(ALICE, a.id, c.id).await.unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));
    let err = fs.move_node(ALICE, a.id, a.id).await.unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));

    // Tree unchanged by the rejected moves
    assert_eq!(
        fs.get_node_by_id(ALICE, a.id).await.unwrap().unwrap().parent_id,
        Some(alice_home.id)
    );
    assert_eq!(by_path(&fs, ALICE, "/home/alice/a/b/c").await.id, c.id);
}

#[tokio::test]
async fn test_move_checks_destination_and_permissions() {
    let (fs, alice_home, bob_home) = setup().await;
    let a = fs
        .create_node(ALICE, CreateNodeRequest::directory(alice_home.id, "a"))
        .await
        .unwrap();
    let file = fs
        .create_node(ALICE, CreateNodeRequest::file(alice_home.id, "f.txt", ""))
        .await
        .unwrap();
    fs.create_node(ALICE, CreateNodeRequest::file(a.id, "f.txt", ""))
        .await
        .unwrap();

    let err = fs.move_node(ALICE, file.id, a.id).await.unwrap_err();
    assert!(matches!(err, FsError::Conflict(_)));

    let err = fs.move_node(ALICE, a.id, file.id).await.unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));
    let err = fs.move_node(ALICE, a.id, NodeId::new()).await.unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));

    let err = fs.move_node(ALICE, a.id, bob_home.id).await.unwrap_err();
    assert!(matches!(err, FsError::Forbidden(_)));
    let err = fs.move_node(BOB, a.id, bob_home.id).await.unwrap_err();
    assert!(matches!(err, FsError::Forbidden(_)));

    let tmp = by_path(&fs, ALICE, "/tmp").await;
    let moved = fs.move_node(ALICE, file.id, tmp.id).await.unwrap();
    assert_eq!(moved.parent_id, Some(tmp.id));
    assert_eq!(by_path(&fs, BOB, "/tmp/f.txt").await.id, file.id);

    // Moving to the current parent is a no-op, not a conflict
    let moved = fs.move_node(ALICE, a.id, alice_home.id).await.unwrap();
    assert_eq!(moved.parent_id, Some(alice_home.id));
}

#[tokio::test]
async fn test_path_resolution_respects_execute() {
    let (fs, alice_home, _) = setup().await;
    let welcome = by_path(&fs, ALICE, "/home/alice/welcome.txt").await;
    assert_eq!(welcome.parent_id, Some(alice_home.id));
    assert!(welcome.content.unwrap().contains("alice"));

    // rwx------ home: bob cannot traverse it even though the file is world-readable
    assert!(
        fs.get_node_by_path(BOB, "/home/alice/welcome.txt")
            .await
            .unwrap()
            .is_none()
    );
    assert!(fs.get_node_by_path(BOB, "/home/alice").await.unwrap().is_none());

    fs.update_node(ALICE, alice_home.id, UpdateNodeRequest::chmod("rwx--x--x"))
        .await
        .unwrap();
    assert_eq!(
        by_path(&fs, BOB, "/home/alice/welcome.txt").await.id,
        welcome.id
    );
    assert!(fs.get_node_by_path(BOB, "/home/alice/missing").await.unwrap().is_none());
    assert!(fs.get_node_by_path(BOB, "/").await.unwrap().unwrap().is_root());
}

#[tokio::test]
async fn test_get_children() {
    let (fs, alice_home, bob_home) = setup().await;
    fs.create_node(ALICE, CreateNodeRequest::file(alice_home.id, "b.txt", ""))
        .await
        .unwrap();
    fs.create_node(ALICE, CreateNodeRequest::directory(alice_home.id, "z"))
        .await
        .unwrap();
    fs.create_node(
        ALICE,
        CreateNodeRequest::file(alice_home.id, "a.txt", "").with_permissions("---------"),
    )
    .await
    .unwrap();

    let names: Vec<String> = fs
        .get_children(ALICE, Some(alice_home.id))
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.name)
        .collect();
    assert_eq!(names, ["z", "b.txt", "welcome.txt"]);

    let err = fs.get_children(ALICE, Some(bob_home.id)).await.unwrap_err();
    assert!(matches!(err, FsError::Forbidden(_)));
    let err = fs.get_children(ALICE, Some(NodeId::new())).await.unwrap_err();
    assert!(matches!(err, FsError::Forbidden(_)));

    let top: Vec<String> = fs
        .get_children(BOB, None)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.name)
        .collect();
    assert_eq!(top, ["bin", "etc", "home", "tmp", "usr", "var"]);
}

#[tokio::test]
async fn test_get_tree_orders_and_filters() {
    let (fs, alice_home, _) = setup().await;
    let docs = fs
        .create_node(ALICE, CreateNodeRequest::directory(alice_home.id, "docs"))
        .await
        .unwrap();
    fs.create_node(ALICE, CreateNodeRequest::file(docs.id, "plan.txt", "v1"))
        .await
        .unwrap();
    fs.create_node(ALICE, CreateNodeRequest::file(alice_home.id, "a.txt", "x"))
        .await
        .unwrap();

    let tree = fs.get_tree(ALICE, Some(alice_home.id)).await.unwrap();
    assert_eq!(tree.kind, NodeType::Directory);
    assert_eq!(child_names(&tree), ["docs", "a.txt", "welcome.txt"]);
    let docs_view = &tree.children.as_ref().unwrap()[0];
    let plan = &docs_view.children.as_ref().unwrap()[0];
    assert_eq!(plan.content.as_deref(), Some("v1"));
    assert!(plan.children.is_none());

    // Whole tree for bob: alice's private home is pruned
    let whole = fs.get_tree(BOB, None).await.unwrap();
    assert_eq!(whole.name, "/");
    let home = whole
        .children
        .as_ref()
        .unwrap()
        .iter()
        .find(|v| v.name == "home")
        .unwrap();
    assert_eq!(child_names(home), ["bob"]);

    let err = fs.get_tree(BOB, Some(alice_home.id)).await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));

    let json = serde_json::to_value(&tree).unwrap();
    assert_eq!(json["type"], "directory");
    assert_eq!(json["permissions"], "rwx------");
}

#[tokio::test]
async fn test_write_file() {
    let (fs, _, _) = setup().await;
    let created = fs
        .write_file(ALICE, "/home/alice/todo.txt", "milk".to_string())
        .await
        .unwrap();
    assert_eq!(created.owner_id, Some(ALICE));

    let updated = fs
        .write_file(ALICE, "/home/alice/todo.txt", "milk, eggs".to_string())
        .await
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.content.as_deref(), Some("milk, eggs"));

    let err = fs
        .write_file(ALICE, "/home/alice", String::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));
    let err = fs
        .write_file(ALICE, "/home/alice/nowhere/x.txt", String::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
    let err = fs
        .write_file(BOB, "/home/alice/todo.txt", String::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
    let err = fs.write_file(ALICE, "/", String::new()).await.unwrap_err();
    assert!(matches!(err, FsError::BadRequest(_)));
}

#[tokio::test]
async fn test_home_directory() {
    let (fs, alice_home, _) = setup().await;
    let home = fs.home_directory(ALICE).await.unwrap().unwrap();
    assert_eq!(home.id, alice_home.id);
    assert!(fs.home_directory(UserId(99)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_provisioning_is_idempotent() {
    let (fs, _, _) = setup().await;
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let fs = fs.clone();
            tokio::spawn(async move { fs.provision_home(UserId(3), "carol").await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let home = by_path(&fs, UserId(3), "/home").await;
    let carols = fs
        .get_children(UserId(3), Some(home.id))
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.name == "carol")
        .count();
    assert_eq!(carols, 1);
    assert!(fs.get_node_by_path(UserId(3), "/home/carol/welcome.txt").await.unwrap().is_some());
}

#[tokio::test]
async fn test_open_from_config() {
    init_tracing();
    let config = FsConfig::from_json(r#"{"database_url": "sqlite::memory:"}"#).unwrap();
    let fs = FsEngine::open(&config).await.unwrap();
    let root = fs.get_node_by_path(ALICE, "/").await.unwrap().unwrap();
    assert!(root.owner_id.is_none());

    let unseeded = FsConfig {
        seed_on_open: false,
        ..config
    };
    let fs = FsEngine::open(&unseeded).await.unwrap();
    assert!(fs.get_node_by_path(ALICE, "/").await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_opposite_moves_cannot_form_a_cycle() {
    let (fs, alice_home, _) = setup().await;
    for round in 0..10 {
        let a = fs
            .create_node(ALICE, CreateNodeRequest::directory(alice_home.id, format!("a{round}")))
            .await
            .unwrap();
        let c = fs
            .create_node(ALICE, CreateNodeRequest::directory(alice_home.id, format!("c{round}")))
            .await
            .unwrap();
        let (a, c) = (a.id, c.id);

        let a_into_c = {
            let fs = fs.clone();
            tokio::spawn(async move { fs.move_node(ALICE, a, c).await })
        };
        let c_into_a = {
            let fs = fs.clone();
            tokio::spawn(async move { fs.move_node(ALICE, c, a).await })
        };
        let outcomes = [a_into_c.await.unwrap(), c_into_a.await.unwrap()];

        let moved = outcomes.iter().filter(|o| o.is_ok()).count();
        assert_eq!(moved, 1, "round {round}: {outcomes:?}");
        assert!(
            outcomes
                .iter()
                .any(|o| matches!(o, Err(FsError::BadRequest(_))))
        );

        let store = fs.store();
        let a_below_c = store.is_descendant(c, a).await.unwrap();
        let c_below_a = store.is_descendant(a, c).await.unwrap();
        assert!(a_below_c != c_below_a, "round {round}: cycle or no move");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_stores_sharing_a_database() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db").to_string_lossy().into_owned();

    let first = FsEngine::new(NodeStore::sqlite(path.clone()).await.unwrap());
    first.seed_system_tree().await.unwrap();
    let second = FsEngine::new(NodeStore::sqlite(path).await.unwrap());
    assert_eq!(
        second.seed_system_tree().await.unwrap().id,
        by_path(&first, ALICE, "/").await.id
    );

    for round in 0..10 {
        let user = UserId(100 + round);
        let name = format!("user{round}");
        let (a, b) = tokio::join!(
            first.provision_home(user, &name),
            second.provision_home(user, &name)
        );
        assert_eq!(a.unwrap().id, b.unwrap().id, "round {round}");
    }

    let tmp = by_path(&first, ALICE, "/tmp").await;
    let (a, b) = tokio::join!(
        first.create_node(ALICE, CreateNodeRequest::file(tmp.id, "race.txt", "a")),
        second.create_node(BOB, CreateNodeRequest::file(tmp.id, "race.txt", "b"))
    );
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1, "{outcomes:?}");
    assert!(
        outcomes
            .iter()
            .any(|o| matches!(o, Err(FsError::Conflict(_)))),
        "{outcomes:?}"
    );
}

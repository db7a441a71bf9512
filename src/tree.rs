//! Tree materialization.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::node::{Node, NodeId, NodeType, TreeView, UserId};
use crate::permissions::can_read;

/// Presentation order: directories before files, then by name.
pub fn presentation_order(a: &Node, b: &Node) -> Ordering {
    let rank = |n: &Node| match n.kind {
        NodeType::Directory => 0,
        NodeType::File => 1,
    };
    rank(a).cmp(&rank(b)).then_with(|| a.name.cmp(&b.name))
}

/// Render `node` and the readable part of `descendants` as a nested view.
///
/// `descendants` may be in any order and may include nodes outside the
/// subtree; only those reachable from `node` through parent links appear.
/// A child the user cannot read is left out together with everything
/// below it.
pub fn materialize(node: &Node, descendants: &[Node], user: UserId) -> TreeView {
    let mut by_parent: HashMap<NodeId, Vec<&Node>> = HashMap::new();
    for child in descendants {
        if let Some(parent_id) = child.parent_id {
            by_parent.entry(parent_id).or_default().push(child);
        }
    }
    for children in by_parent.values_mut() {
        children.sort_by(|a, b| presentation_order(a, b));
    }

    let mut visited = HashSet::new();
    build(node, &by_parent, user, &mut visited)
}

fn build(
    node: &Node,
    by_parent: &HashMap<NodeId, Vec<&Node>>,
    user: UserId,
    visited: &mut HashSet<NodeId>,
) -> TreeView {
    visited.insert(node.id);

    let (content, children) = match node.kind {
        NodeType::File => (Some(node.content.clone().unwrap_or_default()), None),
        NodeType::Directory => {
            let mut children = Vec::new();
            for &child in by_parent.get(&node.id).into_iter().flatten() {
                if can_read(child, user) && !visited.contains(&child.id) {
                    children.push(build(child, by_parent, user, visited));
                }
            }
            (None, Some(children))
        }
    };

    TreeView {
        id: node.id,
        name: node.name.clone(),
        kind: node.kind,
        permissions: node.permissions,
        content,
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Permissions;
    use chrono::Utc;

    fn node(parent: Option<&Node>, name: &str, kind: NodeType, perms: &str) -> Node {
        let now = Utc::now();
        Node {
            id: NodeId::new(),
            owner_id: Some(UserId(1)),
            parent_id: parent.map(|p| p.id),
            name: name.to_string(),
            kind,
            content: (kind == NodeType::File).then(|| format!("contents of {name}")),
            permissions: perms.parse::<Permissions>().unwrap(),
            created_at: now,
            updated_at: now,
        }
    }

    fn names(view: &TreeView) -> Vec<&str> {
        view.children
            .as_ref()
            .map(|c| c.iter().map(|v| v.name.as_str()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_directories_first_then_name() {
        let root = node(None, "/", NodeType::Directory, "rwxr-xr-x");
        let descendants = vec![
            node(Some(&root), "zeta.txt", NodeType::File, "rw-r--r--"),
            node(Some(&root), "beta", NodeType::Directory, "rwxr-xr-x"),
            node(Some(&root), "alpha.txt", NodeType::File, "rw-r--r--"),
            node(Some(&root), "Gamma", NodeType::Directory, "rwxr-xr-x"),
        ];
        let view = materialize(&root, &descendants, UserId(1));
        assert_eq!(names(&view), ["Gamma", "beta", "alpha.txt", "zeta.txt"]);
        assert!(view.content.is_none());
    }

    #[test]
    fn test_nested_and_file_content() {
        let root = node(None, "/", NodeType::Directory, "rwxr-xr-x");
        let docs = node(Some(&root), "docs", NodeType::Directory, "rwxr-xr-x");
        let note = node(Some(&docs), "note.txt", NodeType::File, "rw-r--r--");
        let view = materialize(&root, &[note.clone(), docs.clone()], UserId(1));

        let docs_view = &view.children.as_ref().unwrap()[0];
        assert_eq!(docs_view.id, docs.id);
        let note_view = &docs_view.children.as_ref().unwrap()[0];
        assert_eq!(note_view.content.as_deref(), Some("contents of note.txt"));
        assert!(note_view.children.is_none());
    }

    #[test]
    fn test_file_without_content_renders_empty() {
        let root = node(None, "/", NodeType::Directory, "rwxr-xr-x");
        let mut f = node(Some(&root), "f", NodeType::File, "rw-r--r--");
        f.content = None;
        let view = materialize(&f, &[], UserId(1));
        assert_eq!(view.content.as_deref(), Some(""));
    }

    #[test]
    fn test_unreadable_subtree_is_pruned() {
        let root = node(None, "/", NodeType::Directory, "rwxr-xr-x");
        let secret = node(Some(&root), "secret", NodeType::Directory, "rwx------");
        let inner = node(Some(&secret), "plans.txt", NodeType::File, "rw-r--r--");
        let open = node(Some(&root), "open.txt", NodeType::File, "rw-r--r--");
        let all = [secret, inner, open];

        let stranger = materialize(&root, &all, UserId(2));
        assert_eq!(names(&stranger), ["open.txt"]);

        let owner = materialize(&root, &all, UserId(1));
        assert_eq!(names(&owner), ["secret", "open.txt"]);
        assert_eq!(names(&owner.children.as_ref().unwrap()[0]), ["plans.txt"]);
    }

    #[test]
    fn test_empty_directory_has_empty_children() {
        let root = node(None, "/", NodeType::Directory, "rwxr-xr-x");
        let view = materialize(&root, &[], UserId(1));
        assert_eq!(view.children, Some(vec![]));
    }
}

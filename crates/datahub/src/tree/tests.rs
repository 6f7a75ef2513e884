// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::expect_used)]

use super::ResourceTree;
use crate::resource::Resource;
use crate::sample::DataType;

#[test]
fn root_resolves_as_slash() {
    let tree = ResourceTree::new();
    assert_eq!(tree.find("/"), Some(tree.root()));
    assert_eq!(tree.path_of(tree.root()), "/");
}

#[test]
fn resolve_creates_namespaces_on_demand() {
    let mut tree = ResourceTree::new();
    let leaf = tree.resolve("/app/sensor/value").expect("resolves");

    assert_eq!(tree.path_of(leaf), "/app/sensor/value");
    assert_eq!(tree.find("/app/sensor/value"), Some(leaf));
    assert_eq!(tree.entry(leaf).name(), "value");

    // Intermediate namespaces exist now.
    assert!(tree.find("/app").is_some());
    assert!(tree.find("/app/sensor").is_some());
}

#[test]
fn find_does_not_create() {
    let tree = ResourceTree::new();
    assert!(tree.find("/nope").is_none());
}

#[test]
fn malformed_paths_are_rejected() {
    let mut tree = ResourceTree::new();
    assert!(tree.resolve("relative/path").is_err());
    assert!(tree.resolve("/double//slash").is_err());
    assert!(tree.find("no-slash").is_none());

    let long = format!("/{}", "x".repeat(crate::config::MAX_RESOURCE_PATH_BYTES));
    assert!(tree.resolve(&long).is_err());
}

#[test]
fn resolve_is_idempotent() {
    let mut tree = ResourceTree::new();
    let first = tree.resolve("/a/b").expect("resolves");
    let second = tree.resolve("/a/b").expect("resolves");
    assert_eq!(first, second);
}

#[test]
fn children_keep_insertion_order() {
    let mut tree = ResourceTree::new();
    tree.resolve("/p/one").expect("resolves");
    tree.resolve("/p/two").expect("resolves");
    tree.resolve("/p/three").expect("resolves");

    let parent = tree.find("/p").expect("exists");
    let mut names = Vec::new();
    let mut child = tree.first_child(parent, false);
    while let Some(c) = child {
        names.push(tree.entry(c).name().to_owned());
        child = tree.next_sibling(c, false);
    }
    assert_eq!(names, vec!["one", "two", "three"]);
}

#[test]
fn new_flag_set_on_creation() {
    let mut tree = ResourceTree::new();
    let id = tree.resolve("/fresh").expect("resolves");
    assert!(tree.entry(id).is_new());

    tree.entry_mut(id).clear_newness();
    assert!(!tree.entry(id).is_new());
}

#[test]
fn zombies_are_skipped_by_live_lookups() {
    let mut tree = ResourceTree::new();
    let id = tree.resolve("/app/z").expect("resolves");
    tree.mark_deleted(id);

    assert!(tree.find("/app/z").is_none());
    let parent = tree.find("/app").expect("parent lives");
    assert!(tree.first_child(parent, false).is_none());
    assert_eq!(tree.first_child(parent, true), Some(id));
    assert_eq!(tree.deletion_records(), 1);
    assert!(tree.subtree_has_deletions(tree.root()));
}

#[test]
fn zombie_name_can_be_reused() {
    let mut tree = ResourceTree::new();
    let old = tree.resolve("/app/z").expect("resolves");
    tree.mark_deleted(old);

    let fresh = tree.resolve("/app/z").expect("resolves");
    assert_ne!(old, fresh);

    // Both are visible to a traversal that includes deleted entries.
    let parent = tree.find("/app").expect("parent");
    let first = tree.first_child(parent, true).expect("zombie first");
    let second = tree.next_sibling(first, true).expect("fresh second");
    assert_eq!((first, second), (old, fresh));
}

#[test]
fn release_collects_empty_ancestors() {
    let mut tree = ResourceTree::new();
    let leaf = tree.resolve("/a/b/c").expect("resolves");

    tree.release_and_collect(leaf);
    assert!(tree.find("/a/b/c").is_none());
    assert!(tree.find("/a/b").is_none());
    assert!(tree.find("/a").is_none());
}

#[test]
fn release_stops_at_occupied_ancestors() {
    let mut tree = ResourceTree::new();
    let keep = tree.resolve("/a/keep").expect("resolves");
    tree.entry_mut(keep).resource = Some(Resource::new_input(DataType::Numeric, ""));
    let gone = tree.resolve("/a/gone").expect("resolves");

    tree.release_and_collect(gone);
    assert!(tree.find("/a/gone").is_none());
    assert!(tree.find("/a").is_some(), "/a still has a child");
    assert!(tree.find("/a/keep").is_some());
}

#[test]
fn released_ids_stop_resolving() {
    let mut tree = ResourceTree::new();
    let id = tree.resolve("/gone").expect("resolves");
    tree.release_and_collect(id);
    assert!(tree.get(id).is_none());
}

#[test]
fn flush_deletion_records_releases_zombies() {
    let mut tree = ResourceTree::new();
    let z = tree.resolve("/app/z").expect("resolves");
    tree.mark_deleted(z);
    assert_eq!(tree.deletion_records(), 1);

    let root = tree.root();
    tree.flush_deletion_records(root);
    assert_eq!(tree.deletion_records(), 0);
    assert!(tree.get(z).is_none());
    // The emptied /app namespace is collected too.
    assert!(tree.find("/app").is_none());
}

#[test]
fn sweep_empty_removes_bare_namespaces() {
    let mut tree = ResourceTree::new();
    tree.resolve("/empty/chain").expect("resolves");
    let keep = tree.resolve("/kept").expect("resolves");
    tree.entry_mut(keep).resource = Some(Resource::new_input(DataType::Boolean, ""));

    let root = tree.root();
    tree.sweep_empty(root);
    assert!(tree.find("/empty").is_none());
    assert!(tree.find("/kept").is_some());
}

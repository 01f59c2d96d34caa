//! Tests for the entity applier: deterministic IDs, stale reaping,
//! idempotence, and patch accounting.

use super::*;
use crate::store::MemoryStore;

fn repo_entity() -> EntityId {
    EntityId::from_value("repo-1")
}

fn remote_pr(github_id: u64, number: u64, title: &str) -> RemotePullRequest {
    serde_json::from_value(serde_json::json!({
        "id": github_id,
        "number": number,
        "title": title,
        "state": "open",
        "head": { "ref": "feature", "sha": "abc123" },
        "base": { "ref": "main", "sha": "def456" },
        "user": { "id": 7, "login": "octocat" },
        "labels": [{ "name": "bug" }, { "name": "urgent" }],
        "assignees": [{ "id": 8, "login": "hubber" }],
    }))
    .unwrap()
}

fn tree_entry(path: &str, sha: &str) -> RemoteTreeEntry {
    serde_json::from_value(serde_json::json!({
        "path": path,
        "type": "blob",
        "sha": sha,
    }))
    .unwrap()
}

// ============================================================================
// Deterministic IDs
// ============================================================================

mod tree_id_tests {
    use super::*;

    /// Tree-entry IDs depend only on (repo, ref, path).
    #[test]
    fn test_tree_entry_id_is_deterministic() {
        let a = build_tree_entry_id(&repo_entity(), "main", "src/lib.rs");
        let b = build_tree_entry_id(&repo_entity(), "main", "src/lib.rs");
        assert_eq!(a, b);

        assert_ne!(a, build_tree_entry_id(&repo_entity(), "dev", "src/lib.rs"));
        assert_ne!(a, build_tree_entry_id(&repo_entity(), "main", "src/other.rs"));
    }
}

// ============================================================================
// Stale Reaping
// ============================================================================

mod stale_entry_tests {
    use super::*;

    /// Exactly the entries whose path is absent from the incoming set are
    /// returned.
    #[test]
    fn test_compute_stale_entries_exact_set() {
        let existing = vec![
            (EntityId::from_value("e-a"), "a.rs".to_string()),
            (EntityId::from_value("e-b"), "b.rs".to_string()),
            (EntityId::from_value("e-c"), "c.rs".to_string()),
        ];
        let incoming: HashSet<String> = ["a.rs".to_string(), "c.rs".to_string()].into();

        let stale = compute_stale_entries(&existing, &incoming);
        assert_eq!(stale, vec![EntityId::from_value("e-b")]);

        // Empty incoming set reaps everything.
        let all = compute_stale_entries(&existing, &HashSet::new());
        assert_eq!(all.len(), 3);

        // Superset incoming reaps nothing.
        let none = compute_stale_entries(&[], &incoming);
        assert!(none.is_empty());
    }
}

mod tree_tests {
    use super::*;

    /// Re-syncing a tree deletes vanished paths, inserts new ones, and
    /// keeps the same ID for surviving paths.
    #[tokio::test]
    async fn test_tree_reap_on_resync() {
        let store = MemoryStore::new();
        let now = chrono::Utc::now();

        apply_tree(
            &store,
            &repo_entity(),
            "main",
            &[tree_entry("a.ts", "s1"), tree_entry("b.ts", "s2")],
            now,
        )
        .await
        .unwrap();

        let a_id = build_tree_entry_id(&repo_entity(), "main", "a.ts");
        let b_id = build_tree_entry_id(&repo_entity(), "main", "b.ts");
        assert!(store.get(&a_id).await.unwrap().is_some());
        assert!(store.get(&b_id).await.unwrap().is_some());

        apply_tree(
            &store,
            &repo_entity(),
            "main",
            &[tree_entry("a.ts", "s1-new"), tree_entry("c.ts", "s3")],
            now,
        )
        .await
        .unwrap();

        // b.ts deleted, c.ts inserted, a.ts updated under the same ID.
        assert!(store.get(&b_id).await.unwrap().is_none());
        let c_id = build_tree_entry_id(&repo_entity(), "main", "c.ts");
        assert!(store.get(&c_id).await.unwrap().is_some());

        let a_row: crate::entities::TreeEntryRow =
            store.get(&a_id).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(a_row.sha, "s1-new");

        let remaining = store
            .query_prefix(EntityKind::TreeEntry, &format!("{}:main:", repo_entity()))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 2);
    }

    /// Trees on different refs do not interfere.
    #[tokio::test]
    async fn test_tree_refs_are_independent() {
        let store = MemoryStore::new();
        let now = chrono::Utc::now();

        apply_tree(&store, &repo_entity(), "main", &[tree_entry("a.ts", "s1")], now)
            .await
            .unwrap();
        apply_tree(&store, &repo_entity(), "dev", &[tree_entry("b.ts", "s2")], now)
            .await
            .unwrap();

        // Re-syncing main must not reap dev's entries.
        apply_tree(&store, &repo_entity(), "main", &[tree_entry("a.ts", "s1")], now)
            .await
            .unwrap();

        let dev_id = build_tree_entry_id(&repo_entity(), "dev", "b.ts");
        assert!(store.get(&dev_id).await.unwrap().is_some());
    }
}

// ============================================================================
// Idempotence
// ============================================================================

mod idempotence_tests {
    use super::*;

    /// Applying the same PR twice yields one row with the same ID and
    /// equal fields.
    #[tokio::test]
    async fn test_pull_request_apply_is_idempotent() {
        let store = MemoryStore::new();
        let now = chrono::Utc::now();
        let remote = remote_pr(100, 7, "Fix the flux capacitor");

        let first = apply_pull_request(&store, &repo_entity(), &remote, now).await.unwrap();
        let after_first: crate::entities::PullRequestRow =
            store.get(&first).await.unwrap().unwrap().decode().unwrap();

        let second = apply_pull_request(&store, &repo_entity(), &remote, now).await.unwrap();
        let after_second: crate::entities::PullRequestRow =
            store.get(&second).await.unwrap().unwrap().decode().unwrap();

        assert_eq!(first, second, "same GitHub ID must reuse the local ID");
        assert_eq!(after_first, after_second);

        let all = store.query_kind(EntityKind::PullRequest).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    /// Label and assignee arrays land as JSON strings.
    #[tokio::test]
    async fn test_labels_and_assignees_serialized() {
        let store = MemoryStore::new();
        let remote = remote_pr(100, 7, "Labelled");

        let id = apply_pull_request(&store, &repo_entity(), &remote, chrono::Utc::now())
            .await
            .unwrap();
        let row: crate::entities::PullRequestRow =
            store.get(&id).await.unwrap().unwrap().decode().unwrap();

        assert_eq!(row.labels, r#"["bug","urgent"]"#);
        assert_eq!(row.assignees, r#"["hubber"]"#);
    }

    /// Viewed-file flags survive a PR refresh.
    #[tokio::test]
    async fn test_viewed_files_survive_refresh() {
        let store = MemoryStore::new();
        let now = chrono::Utc::now();
        let remote = remote_pr(100, 7, "Original title");

        let id = apply_pull_request(&store, &repo_entity(), &remote, now).await.unwrap();
        set_file_viewed(&store, &id, "src/lib.rs", true, now).await.unwrap();

        let refreshed = remote_pr(100, 7, "Edited title");
        apply_pull_request(&store, &repo_entity(), &refreshed, now).await.unwrap();

        let row: crate::entities::PullRequestRow =
            store.get(&id).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(row.title, "Edited title");
        assert!(crate::entities::ViewedFiles::parse(&row.viewed_files).is_viewed("src/lib.rs"));
    }
}

// ============================================================================
// PR Detail
// ============================================================================

mod detail_tests {
    use super::*;
    use octomirror_github::client::PullRequestDetail;

    fn detail_with_files(paths: &[&str]) -> PullRequestDetail {
        PullRequestDetail {
            pull: remote_pr(100, 7, "Detail"),
            files: paths
                .iter()
                .map(|path| {
                    serde_json::from_value(serde_json::json!({
                        "filename": path,
                        "status": "modified",
                        "additions": 1,
                        "deletions": 0,
                    }))
                    .unwrap()
                })
                .collect(),
            reviews: Vec::new(),
            review_comments: Vec::new(),
            issue_comments: Vec::new(),
            events: Vec::new(),
            commits: Vec::new(),
        }
    }

    /// PR files follow the reap rule across detail refreshes.
    #[tokio::test]
    async fn test_pr_files_reaped_on_refresh() {
        let store = MemoryStore::new();
        let now = chrono::Utc::now();

        let pr_id = apply_pull_request_detail(
            &store,
            &repo_entity(),
            &detail_with_files(&["a.rs", "b.rs"]),
            now,
        )
        .await
        .unwrap();

        apply_pull_request_detail(
            &store,
            &repo_entity(),
            &detail_with_files(&["a.rs", "c.rs"]),
            now,
        )
        .await
        .unwrap();

        let files = store
            .query_prefix(EntityKind::PrFile, &format!("{}:", pr_id))
            .await
            .unwrap();
        let mut paths: Vec<String> = files
            .iter()
            .map(|record| record.decode::<crate::entities::PrFileRow>().unwrap().path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["a.rs".to_string(), "c.rs".to_string()]);
    }
}

// ============================================================================
// Patch Stats
// ============================================================================

mod patch_tests {
    use super::*;

    /// Addition/deletion counts come out of the diff body, ignoring file
    /// headers.
    #[test]
    fn test_parse_patch_stats() {
        let patch = "\
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,4 @@
 fn main() {
-    old();
+    new();
+    extra();
 }";
        assert_eq!(parse_patch_stats(patch), (2, 1));
        assert_eq!(parse_patch_stats(""), (0, 0));
    }
}

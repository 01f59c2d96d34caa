//! Pure diff helpers: stale-entry computation and patch line counts.

use crate::EntityId;
use std::collections::HashSet;

/// Return the IDs of existing entries whose path is absent from the
/// incoming set
///
/// The applier deletes exactly these in the same transaction that inserts
/// the incoming entries.
pub fn compute_stale_entries(
    existing: &[(EntityId, String)],
    incoming_paths: &HashSet<String>,
) -> Vec<EntityId> {
    existing
        .iter()
        .filter(|(_, path)| !incoming_paths.contains(path))
        .map(|(id, _)| id.clone())
        .collect()
}

/// Count additions and deletions in a unified diff hunk
///
/// File header lines (`+++`, `---`) do not count.
pub fn parse_patch_stats(patch: &str) -> (u64, u64) {
    let mut additions = 0;
    let mut deletions = 0;

    for line in patch.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            additions += 1;
        } else if line.starts_with('-') {
            deletions += 1;
        }
    }

    (additions, deletions)
}

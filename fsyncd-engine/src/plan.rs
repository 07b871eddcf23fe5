//! Plan computation between two tree indexes.
//!
//! The builder pairs directories by key, decides copy direction per file by
//! "newer wins", and collects everything into a [`SyncPlan`]: four disjoint
//! action lists consumed by the executor in a fixed phase order. A plan is
//! only produced after the size-difference gate passes; trees that differ by
//! too much raise [`SyncError::TooLargeDifference`] instead, on the
//! assumption that one side has been catastrophically damaged.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::debug;

use crate::errors::{Result, SyncError};
use crate::scanner::{DirNode, TreeIndex, ROOT_MASK};

/// A single directed copy operation. `src` always names the authoritative
/// side: the endpoint with the newer modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPair {
    pub src: PathBuf,
    pub dst: PathBuf,
    /// Permission bits to apply to the destination, taken from the
    /// authoritative side.
    pub mode: u32,
}

/// A directory to create under the destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDirectory {
    pub path: PathBuf,
    pub mode: u32,
}

/// The totally-ordered action plan for one reconciliation. Executed in the
/// field order below; no destination path appears in more than one
/// collection.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Absolute destination paths to remove recursively.
    pub dirs_to_delete: Vec<PathBuf>,
    /// Destination-only files, grouped by origin-directory name plus
    /// basename so the executor can drive one group at a time.
    pub files_to_delete: HashMap<String, Vec<PathBuf>>,
    /// Directories to create under the destination root. Creation is
    /// recursive, so parent-before-child ordering is not required.
    pub dirs_to_create: Vec<NewDirectory>,
    /// Copy operations in either direction.
    pub sync_pairs: Vec<SyncPair>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.action_count() == 0
    }

    pub fn action_count(&self) -> usize {
        self.dirs_to_delete.len()
            + self.files_to_delete.values().map(Vec::len).sum::<usize>()
            + self.dirs_to_create.len()
            + self.sync_pairs.len()
    }
}

/// Builds a [`SyncPlan`] from a source and a destination index.
#[derive(Debug, Clone, Copy)]
pub struct PlanBuilder {
    max_diff_percent: u8,
}

impl PlanBuilder {
    /// `max_diff_percent` is the size-gate threshold in percent, 1..=100.
    pub fn new(max_diff_percent: u8) -> Self {
        Self { max_diff_percent }
    }

    pub fn build(&self, src: &TreeIndex, dst: &TreeIndex) -> Result<SyncPlan> {
        self.check_size_gate(src, dst)?;

        let mut plan = SyncPlan::default();

        for (key, src_dir) in &src.dirs {
            let src_abs = src_dir.abs_path(&src.mount_point);
            let dst_abs = src_dir.abs_path(&dst.mount_point);

            let dst_dir = dst.dirs.get(key);
            if dst_dir.is_none() {
                if key == ROOT_MASK {
                    return Err(SyncError::Invariant(
                        "no root destination directory".to_string(),
                    ));
                }
                plan.dirs_to_create.push(NewDirectory {
                    path: dst_abs.clone(),
                    mode: src_dir.mode,
                });
            }

            reconcile_files(src_dir, dst_dir, &src_abs, &dst_abs, &mut plan);
        }

        for (key, dst_dir) in &dst.dirs {
            if !src.dirs.contains_key(key) {
                plan.dirs_to_delete.push(dst_dir.abs_path(&dst.mount_point));
            }
        }

        debug!(
            dirs_to_delete = plan.dirs_to_delete.len(),
            file_delete_groups = plan.files_to_delete.len(),
            dirs_to_create = plan.dirs_to_create.len(),
            sync_pairs = plan.sync_pairs.len(),
            "plan built"
        );

        Ok(plan)
    }

    /// Compare total file counts: the trees are reconcilable only when they
    /// differ by strictly less than the configured percentage. Two empty
    /// trees are equal by definition.
    fn check_size_gate(&self, src: &TreeIndex, dst: &TreeIndex) -> Result<()> {
        let src_files = src.file_count();
        let dst_files = dst.file_count();

        let largest = src_files.max(dst_files);
        if largest == 0 {
            return Ok(());
        }

        let diff = src_files.abs_diff(dst_files);
        let percent = (diff as f64 / largest as f64 * 100.0) as u32;
        if percent >= u32::from(self.max_diff_percent) {
            return Err(SyncError::TooLargeDifference {
                src_files,
                dst_files,
                percent,
            });
        }
        Ok(())
    }
}

/// Pair the files of one source directory against its destination
/// counterpart (possibly absent). Files present on both sides copy toward
/// the older side; ties go source to destination. Destination-only files
/// are collected for deletion under a group key of directory name plus
/// basename.
fn reconcile_files(
    src_dir: &DirNode,
    dst_dir: Option<&DirNode>,
    src_abs: &std::path::Path,
    dst_abs: &std::path::Path,
    plan: &mut SyncPlan,
) {
    let mut paired: HashSet<&str> = HashSet::new();

    for (name, src_meta) in &src_dir.files {
        let mut pair = SyncPair {
            src: src_abs.join(name),
            dst: dst_abs.join(name),
            mode: src_meta.mode,
        };

        if let Some(dst_meta) = dst_dir.and_then(|d| d.files.get(name)) {
            paired.insert(name.as_str());
            if dst_meta.modified > src_meta.modified {
                // destination holds the newer version; copy it back
                std::mem::swap(&mut pair.src, &mut pair.dst);
                pair.mode = dst_meta.mode;
            }
        }

        plan.sync_pairs.push(pair);
    }

    let Some(dst_dir) = dst_dir else { return };
    for name in dst_dir.files.keys() {
        if paired.contains(name.as_str()) {
            continue;
        }
        let group = format!("{}{}", dst_dir.name, name);
        plan.files_to_delete
            .entry(group)
            .or_default()
            .push(dst_abs.join(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::FileMeta;
    use chrono::{Duration as TimeDelta, TimeZone, Utc};
    use std::path::Path;

    fn meta_at(offset_minutes: i64) -> FileMeta {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        FileMeta {
            modified: base + TimeDelta::minutes(offset_minutes),
            mode: 0o644,
        }
    }

    fn dir(name: &str, rel: &[&str], files: &[(&str, FileMeta)]) -> DirNode {
        DirNode {
            name: name.to_string(),
            rel: rel.iter().map(|s| s.to_string()).collect(),
            mode: 0o755,
            files: files
                .iter()
                .map(|(n, m)| (n.to_string(), *m))
                .collect(),
        }
    }

    fn index(mount: &str, dirs: Vec<(String, DirNode)>) -> TreeIndex {
        TreeIndex {
            mount_point: PathBuf::from(mount),
            dirs: dirs.into_iter().collect(),
        }
    }

    fn root_entry(name: &str, files: &[(&str, FileMeta)]) -> (String, DirNode) {
        (ROOT_MASK.to_string(), dir(name, &[], files))
    }

    #[test]
    fn missing_files_copy_source_to_destination() {
        let src = index(
            "/m",
            vec![
                root_entry("m", &[]),
                (
                    "sync-dir".to_string(),
                    dir(
                        "sync-dir",
                        &["sync-dir"],
                        &[
                            ("a.txt", meta_at(0)),
                            ("b.txt", meta_at(0)),
                            ("c.txt", meta_at(0)),
                        ],
                    ),
                ),
            ],
        );
        let dst = index(
            "/c",
            vec![
                root_entry("c", &[]),
                (
                    "sync-dir".to_string(),
                    dir(
                        "sync-dir",
                        &["sync-dir"],
                        &[("a.txt", meta_at(0)), ("c.txt", meta_at(0))],
                    ),
                ),
            ],
        );

        let plan = PlanBuilder::new(35).build(&src, &dst).unwrap();

        assert!(plan.dirs_to_delete.is_empty());
        assert!(plan.files_to_delete.is_empty());
        assert!(plan.dirs_to_create.is_empty());
        assert_eq!(plan.sync_pairs.len(), 3);
        for suffix in ["a.txt", "b.txt", "c.txt"] {
            let pair = plan
                .sync_pairs
                .iter()
                .find(|p| p.src.ends_with(Path::new("sync-dir").join(suffix)))
                .unwrap_or_else(|| panic!("no pair for {suffix}"));
            assert_eq!(pair.src, PathBuf::from("/m/sync-dir").join(suffix));
            assert_eq!(pair.dst, PathBuf::from("/c/sync-dir").join(suffix));
        }
    }

    #[test]
    fn newer_destination_swaps_direction_and_mode() {
        let src = index(
            "/m",
            vec![
                root_entry("m", &[]),
                (
                    "sync-dir".to_string(),
                    dir(
                        "sync-dir",
                        &["sync-dir"],
                        &[
                            ("a.txt", meta_at(0)),
                            ("b.txt", meta_at(0)),
                            ("c.txt", meta_at(0)),
                        ],
                    ),
                ),
            ],
        );
        let newer = FileMeta {
            modified: meta_at(10).modified,
            mode: 0o600,
        };
        let dst = index(
            "/c",
            vec![
                root_entry("c", &[]),
                (
                    "sync-dir".to_string(),
                    dir(
                        "sync-dir",
                        &["sync-dir"],
                        &[("a.txt", newer), ("c.txt", meta_at(0))],
                    ),
                ),
            ],
        );

        let plan = PlanBuilder::new(35).build(&src, &dst).unwrap();
        assert_eq!(plan.sync_pairs.len(), 3);

        let a = plan
            .sync_pairs
            .iter()
            .find(|p| p.src.ends_with("a.txt"))
            .unwrap();
        assert_eq!(a.src, PathBuf::from("/c/sync-dir/a.txt"));
        assert_eq!(a.dst, PathBuf::from("/m/sync-dir/a.txt"));
        assert_eq!(a.mode, 0o600);

        for suffix in ["b.txt", "c.txt"] {
            let pair = plan
                .sync_pairs
                .iter()
                .find(|p| p.dst.ends_with(suffix))
                .unwrap();
            assert!(pair.src.starts_with("/m"));
            assert!(pair.dst.starts_with("/c"));
        }
    }

    #[test]
    fn equal_mtimes_resolve_source_to_destination() {
        let src = index(
            "/m",
            vec![root_entry("m", &[("same.txt", meta_at(0))])],
        );
        let dst = index(
            "/c",
            vec![root_entry("c", &[("same.txt", meta_at(0))])],
        );

        let plan = PlanBuilder::new(100).build(&src, &dst).unwrap();
        let pair = &plan.sync_pairs[0];
        assert_eq!(pair.src, PathBuf::from("/m/same.txt"));
        assert_eq!(pair.dst, PathBuf::from("/c/same.txt"));
    }

    #[test]
    fn size_gate_trips_on_large_difference() {
        // 4 source files vs 1 destination file: 75% difference
        let src = index(
            "/m",
            vec![
                root_entry("m", &[]),
                (
                    "dirA".to_string(),
                    dir(
                        "dirA",
                        &["dirA"],
                        &[("f1", meta_at(0)), ("f2", meta_at(0))],
                    ),
                ),
                (
                    "dirB".to_string(),
                    dir(
                        "dirB",
                        &["dirB"],
                        &[("f3", meta_at(0)), ("f4", meta_at(0))],
                    ),
                ),
            ],
        );
        let dst = index(
            "/c",
            vec![
                root_entry("c", &[]),
                (
                    "dirA".to_string(),
                    dir("dirA", &["dirA"], &[("f1", meta_at(0))]),
                ),
            ],
        );

        let err = PlanBuilder::new(30).build(&src, &dst).unwrap_err();
        match err {
            SyncError::TooLargeDifference {
                src_files,
                dst_files,
                percent,
            } => {
                assert_eq!(src_files, 4);
                assert_eq!(dst_files, 1);
                assert_eq!(percent, 75);
            }
            other => panic!("expected TooLargeDifference, got {other:?}"),
        }
    }

    #[test]
    fn size_gate_boundary_is_inclusive() {
        // 10 vs 7 files: floor(30%) == threshold 30 -> rejected
        let files_src: Vec<(String, FileMeta)> =
            (0..10).map(|i| (format!("s{i}"), meta_at(0))).collect();
        let files_dst: Vec<(String, FileMeta)> =
            (0..7).map(|i| (format!("s{i}"), meta_at(0))).collect();
        let src = index(
            "/m",
            vec![(
                ROOT_MASK.to_string(),
                DirNode {
                    name: "m".into(),
                    rel: vec![],
                    mode: 0o755,
                    files: files_src.into_iter().collect(),
                },
            )],
        );
        let dst = index(
            "/c",
            vec![(
                ROOT_MASK.to_string(),
                DirNode {
                    name: "c".into(),
                    rel: vec![],
                    mode: 0o755,
                    files: files_dst.into_iter().collect(),
                },
            )],
        );

        assert!(matches!(
            PlanBuilder::new(30).build(&src, &dst),
            Err(SyncError::TooLargeDifference { percent: 30, .. })
        ));
        assert!(PlanBuilder::new(31).build(&src, &dst).is_ok());
    }

    #[test]
    fn two_empty_trees_pass_the_gate() {
        let src = index("/m", vec![root_entry("m", &[])]);
        let dst = index("/c", vec![root_entry("c", &[])]);

        let plan = PlanBuilder::new(1).build(&src, &dst).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn destination_only_files_group_by_directory_name() {
        let src = index(
            "/m",
            vec![
                root_entry("m", &[]),
                (
                    "sync-dir".to_string(),
                    dir("dir_a", &["sync-dir"], &[("test.txt", meta_at(0))]),
                ),
            ],
        );
        let dst = index(
            "/c",
            vec![
                root_entry("c", &[]),
                (
                    "sync-dir".to_string(),
                    dir("dir_a", &["sync-dir"], &[("any_file.txt", meta_at(0))]),
                ),
            ],
        );

        let plan = PlanBuilder::new(30).build(&src, &dst).unwrap();

        assert_eq!(plan.sync_pairs.len(), 1);
        assert_eq!(
            plan.sync_pairs[0].dst,
            PathBuf::from("/c/sync-dir/test.txt")
        );
        assert_eq!(
            plan.files_to_delete.get("dir_aany_file.txt"),
            Some(&vec![PathBuf::from("/c/sync-dir/any_file.txt")])
        );
    }

    #[test]
    fn destination_only_directories_are_deleted() {
        let src = index("/m", vec![root_entry("m", &[])]);
        let dst = index(
            "/c",
            vec![
                root_entry("c", &[]),
                (
                    "stale".to_string(),
                    dir("stale", &["stale"], &[("old.txt", meta_at(0))]),
                ),
            ],
        );

        // one file difference out of one file is 100%; open the gate wide
        let plan = PlanBuilder::new(100).build(&src, &dst).unwrap_err();
        assert!(matches!(plan, SyncError::TooLargeDifference { .. }));

        // with equal counts elsewhere the stale directory is deleted
        let src = index(
            "/m",
            vec![root_entry("m", &[("keep.txt", meta_at(0))])],
        );
        let plan = PlanBuilder::new(100).build(&src, &dst).unwrap();
        assert_eq!(plan.dirs_to_delete, vec![PathBuf::from("/c/stale")]);
        // files inside a deleted directory are not deleted twice
        assert!(plan.files_to_delete.is_empty());
    }

    #[test]
    fn source_only_directories_are_created_with_their_files() {
        let src = index(
            "/m",
            vec![
                root_entry("m", &[("anchor.txt", meta_at(0))]),
                (
                    "fresh".to_string(),
                    dir("fresh", &["fresh"], &[("new.txt", meta_at(0))]),
                ),
            ],
        );
        let dst = index(
            "/c",
            vec![root_entry("c", &[("anchor.txt", meta_at(0))])],
        );

        let plan = PlanBuilder::new(100).build(&src, &dst).unwrap();
        assert_eq!(
            plan.dirs_to_create,
            vec![NewDirectory {
                path: PathBuf::from("/c/fresh"),
                mode: 0o755,
            }]
        );
        assert!(plan
            .sync_pairs
            .iter()
            .any(|p| p.dst == PathBuf::from("/c/fresh/new.txt")));
    }

    #[test]
    fn missing_destination_root_is_fatal() {
        let src = index("/m", vec![root_entry("m", &[])]);
        let dst = index("/c", vec![]);

        let err = PlanBuilder::new(100).build(&src, &dst).unwrap_err();
        assert!(matches!(err, SyncError::Invariant(_)));
    }

    #[test]
    fn identical_trees_produce_a_safe_noop_plan() {
        let files = &[("a.txt", meta_at(0)), ("b.txt", meta_at(0))];
        let src = index(
            "/m",
            vec![
                root_entry("m", files),
                ("sub".to_string(), dir("sub", &["sub"], files)),
            ],
        );
        let dst = index(
            "/c",
            vec![
                root_entry("c", files),
                ("sub".to_string(), dir("sub", &["sub"], files)),
            ],
        );

        let plan = PlanBuilder::new(1).build(&src, &dst).unwrap();
        assert!(plan.dirs_to_delete.is_empty());
        assert!(plan.files_to_delete.is_empty());
        assert!(plan.dirs_to_create.is_empty());
        assert_eq!(plan.sync_pairs.len(), 4);
        for pair in &plan.sync_pairs {
            assert!(pair.src.starts_with("/m"), "tie must keep src->dst: {pair:?}");
            assert!(pair.dst.starts_with("/c"));
        }
    }

    #[test]
    fn no_destination_path_appears_in_two_collections() {
        let src = index(
            "/m",
            vec![
                root_entry("m", &[("shared.txt", meta_at(0)), ("srconly.txt", meta_at(0))]),
                (
                    "created".to_string(),
                    dir("created", &["created"], &[("inside.txt", meta_at(0))]),
                ),
            ],
        );
        let dst = index(
            "/c",
            vec![
                root_entry(
                    "c",
                    &[("shared.txt", meta_at(5)), ("dstonly.txt", meta_at(0))],
                ),
                (
                    "stale".to_string(),
                    dir("stale", &["stale"], &[("gone.txt", meta_at(0))]),
                ),
            ],
        );

        let plan = PlanBuilder::new(100).build(&src, &dst).unwrap();

        let mut seen: HashSet<PathBuf> = HashSet::new();
        for path in &plan.dirs_to_delete {
            assert!(seen.insert(path.clone()), "duplicate {path:?}");
        }
        for path in plan.files_to_delete.values().flatten() {
            assert!(seen.insert(path.clone()), "duplicate {path:?}");
        }
        for dir in &plan.dirs_to_create {
            assert!(seen.insert(dir.path.clone()), "duplicate {:?}", dir.path);
        }
        for pair in &plan.sync_pairs {
            assert!(seen.insert(pair.dst.clone()), "duplicate {:?}", pair.dst);
        }
    }
}

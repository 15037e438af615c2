//! Property tests for the incremental aggregate invariant.
//!
//! For any sequence of created/modified/deleted events, the running token
//! aggregate must equal the sum over currently-live entries recomputed
//! from scratch, and double deletes must change the aggregate exactly
//! once.

use proptest::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::runtime::Runtime;

use treetally_indexer::{
    ChangeEvent, ChangeKind, HeuristicAnalyzer, IncrementalIndex, IndexOptions, MemoryCache,
};

#[derive(Debug, Clone)]
enum Op {
    Create(usize, u8),
    Modify(usize, u8),
    Delete(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..4, 1u8..20).prop_map(|(f, n)| Op::Create(f, n)),
        (0usize..4, 1u8..20).prop_map(|(f, n)| Op::Modify(f, n)),
        (0usize..4).prop_map(Op::Delete),
    ]
}

fn file_name(slot: usize) -> String {
    format!("file_{}.rs", slot)
}

fn content(words: u8) -> String {
    let mut out = String::new();
    for i in 0..words {
        out.push_str(&format!("word{} ", i));
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn aggregate_equals_recomputed_sum(ops in proptest::collection::vec(op_strategy(), 1..24)) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async move {
            let temp_dir = tempdir().unwrap();
            let root = temp_dir.path().canonicalize().unwrap();

            let index = IncrementalIndex::new(
                Arc::new(HeuristicAnalyzer::new()),
                Arc::new(MemoryCache::new()),
                IndexOptions::default(),
            );
            index.initialize(&root).await.unwrap();

            for op in ops {
                let (path, kind): (PathBuf, ChangeKind) = match op {
                    Op::Create(slot, words) => {
                        let path = root.join(file_name(slot));
                        std::fs::write(&path, content(words)).unwrap();
                        (path, ChangeKind::Created)
                    }
                    Op::Modify(slot, words) => {
                        let path = root.join(file_name(slot));
                        std::fs::write(&path, content(words)).unwrap();
                        (path, ChangeKind::Modified)
                    }
                    Op::Delete(slot) => {
                        let path = root.join(file_name(slot));
                        let _ = std::fs::remove_file(&path);
                        (path, ChangeKind::Deleted)
                    }
                };

                index
                    .apply(ChangeEvent::new(&root, path, kind))
                    .await
                    .unwrap();

                // The running aggregate never drifts from the true sum
                prop_assert_eq!(index.reconcile(), 0);
            }
            Ok(())
        })?;
    }

    #[test]
    fn delete_changes_aggregate_exactly_once(words in 1u8..20) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async move {
            let temp_dir = tempdir().unwrap();
            let root = temp_dir.path().canonicalize().unwrap();
            let path = root.join("victim.rs");
            std::fs::write(&path, content(words)).unwrap();

            let index = IncrementalIndex::new(
                Arc::new(HeuristicAnalyzer::new()),
                Arc::new(MemoryCache::new()),
                IndexOptions::default(),
            );
            let stats = index.initialize(&root).await.unwrap();
            prop_assert!(stats.total_tokens > 0);

            std::fs::remove_file(&path).unwrap();

            index
                .apply(ChangeEvent::new(&root, path.clone(), ChangeKind::Deleted))
                .await
                .unwrap();
            prop_assert_eq!(index.stats().total_tokens, 0);
            prop_assert_eq!(index.stats().files, 0);

            index
                .apply(ChangeEvent::new(&root, path, ChangeKind::Deleted))
                .await
                .unwrap();
            prop_assert_eq!(index.stats().total_tokens, 0);
            prop_assert_eq!(index.reconcile(), 0);
            Ok(())
        })?;
    }
}

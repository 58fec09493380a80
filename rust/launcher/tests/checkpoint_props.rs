//! Pruning and upload gating over arbitrary checkpoint directories.

use std::{
    collections::BTreeSet,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use proptest::prelude::*;
use stylegan2_config::CheckpointPolicy;
use stylegan2_launcher::{
    CheckpointHook,
    blob::{BlobError, BlobStore},
    checkpoint::{checkpoint_file_name, is_model_file},
};

#[derive(Default)]
struct RecordingStore {
    uploads: Mutex<Vec<String>>,
}

#[async_trait]
impl BlobStore for RecordingStore {
    async fn upload_file(&self, dest_path: &str, _source: &Path) -> Result<u64, BlobError> {
        self.uploads.lock().unwrap().push(dest_path.to_string());
        Ok(0)
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn other_name() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,8}\\.(png|json|txt)",
        "model_[0-9]{1,3}\\.pth",
        "model_[0-9]{1,3}\\.pt\\.tmp",
        "best_model_[0-9]{1,2}\\.pt",
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prune_keeps_current_and_foreign_files(
        epochs in prop::collection::btree_set(0u64..200, 1..20),
        others in prop::collection::btree_set(other_name(), 0..6),
        pick in any::<prop::sample::Index>(),
    ) {
        let epochs: Vec<u64> = epochs.into_iter().collect();
        let current = epochs[pick.index(epochs.len())];

        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run");
        std::fs::create_dir(&dir).unwrap();
        for e in &epochs {
            std::fs::write(dir.join(checkpoint_file_name(*e)), b"w").unwrap();
        }
        for name in &others {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let hook = CheckpointHook::new(
            CheckpointPolicy { delete_old_models: true, upload_models: false, upload_every: 10 },
            None,
        );
        let report = runtime()
            .block_on(hook.on_model_save(&dir.join(checkpoint_file_name(current))))
            .unwrap();

        let left: BTreeSet<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();

        let mut expected: BTreeSet<String> = others
            .iter()
            .filter(|n| !is_model_file(n))
            .cloned()
            .collect();
        expected.insert(checkpoint_file_name(current));
        prop_assert_eq!(&left, &expected);
        prop_assert_eq!(report.deleted.len() + left.len(), epochs.len() + others.len());
    }

    #[test]
    fn upload_iff_epoch_divisible(epoch in 0u64..10_000, every in 1u64..50) {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("faces");
        std::fs::create_dir(&dir).unwrap();
        let path = dir.join(checkpoint_file_name(epoch));
        std::fs::write(&path, b"w").unwrap();

        let store = Arc::new(RecordingStore::default());
        let hook = CheckpointHook::new(
            CheckpointPolicy { delete_old_models: false, upload_models: true, upload_every: every },
            Some(store.clone()),
        );
        let report = runtime().block_on(hook.on_model_save(&path)).unwrap();

        let uploads = store.uploads.lock().unwrap().clone();
        if epoch % every == 0 {
            let dest = format!("faces/{}", checkpoint_file_name(epoch));
            prop_assert_eq!(uploads, vec![dest.clone()]);
            prop_assert_eq!(report.uploaded, Some(dest));
        } else {
            prop_assert!(uploads.is_empty());
            prop_assert_eq!(report.uploaded, None);
        }
    }
}

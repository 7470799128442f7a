use std::fs::{self, File};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use blobfs_store::{BlobId, BlobStore, BytesSource, FileSource, FsBlobStore};
use tempfile::TempDir;

#[test]
fn stress_test_mass_save() {
    // Quick stress test for CI (100 files ~1 sec)
    const FILE_COUNT: usize = 100;

    let temp = TempDir::new().unwrap();
    let src_dir = temp.path().join("src");
    let store_dir = temp.path().join("store");

    fs::create_dir(&src_dir).unwrap();

    for i in 0..FILE_COUNT {
        let p = src_dir.join(format!("file_{}.txt", i));
        let mut f = File::create(p).unwrap();
        // Alternating content to test dedup (50% unique)
        let content = if i % 2 == 0 {
            format!("content unique {}", i)
        } else {
            "shared content".to_string()
        };
        writeln!(f, "{}", content).unwrap();
    }

    let store = FsBlobStore::ref_counted(&store_dir).unwrap();

    let start = Instant::now();
    let mut ids = Vec::new();
    for entry in walkdir::WalkDir::new(&src_dir) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            ids.push(store.save(&mut FileSource::new(entry.path())).unwrap());
        }
    }
    let duration = start.elapsed();
    println!(
        "Throughput: {:.2} files/sec",
        FILE_COUNT as f64 / duration.as_secs_f64()
    );

    // 50 unique files + 1 shared file = 51 payloads, one marker per save
    let stats = store.stats().unwrap();
    assert_eq!(stats.blob_count, 51);
    assert_eq!(stats.marker_count, FILE_COUNT as u64);

    for id in &ids {
        assert!(store.delete(id).unwrap());
    }
    assert_eq!(store.stats().unwrap().blob_count, 0);
}

#[test]
fn concurrent_identical_saves_share_payload() {
    const THREADS: usize = 8;
    const SAVES: usize = 20;

    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsBlobStore::ref_counted(temp.path()).unwrap());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..SAVES)
                    .map(|i| {
                        let name = format!("t{}-{}", t, i);
                        store
                            .save(&mut BytesSource::new(name, b"same bytes".to_vec()))
                            .unwrap()
                    })
                    .collect::<Vec<BlobId>>()
            })
        })
        .collect();
    let ids: Vec<BlobId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    // Every save got its own reference
    let mut tokens: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    tokens.sort();
    tokens.dedup();
    assert_eq!(tokens.len(), THREADS * SAVES);

    let stats = store.stats().unwrap();
    assert!(stats.blob_count >= 1);
    assert_eq!(stats.marker_count, (THREADS * SAVES) as u64);

    for id in &ids {
        assert!(store.load(id).unwrap().read_to_vec().unwrap() == b"same bytes");
    }
    for id in &ids {
        assert!(store.delete(id).unwrap());
    }
    assert_eq!(store.stats().unwrap().blob_count, 0);
}

#[test]
fn concurrent_save_and_delete_keep_live_blobs_readable() {
    let temp = TempDir::new().unwrap();
    let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::ref_counted(temp.path()).unwrap());
    // Holds the payload alive while the workers churn through references
    let anchor = store
        .save(&mut BytesSource::new("anchor", b"churn".to_vec()))
        .unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..50 {
                    let id = store
                        .save(&mut BytesSource::new("churn", b"churn".to_vec()))
                        .unwrap();
                    assert_eq!(store.load(&id).unwrap().read_to_vec().unwrap(), b"churn");
                    assert!(store.delete(&id).unwrap());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(store.load(&anchor).unwrap().read_to_vec().unwrap(), b"churn");
    assert!(store.delete(&anchor).unwrap());
    assert!(!store.find(&anchor).is_available());
}

#[test]
fn concurrent_churn_on_one_payload_loses_nothing() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsBlobStore::ref_counted(temp.path()).unwrap());

    // No reference outlives a round, so the payload is dropped and
    // recreated while other threads are saving the same bytes.
    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..ROUNDS {
                    let id = store
                        .save(&mut BytesSource::new(format!("t{}-{}", t, i), b"churn".to_vec()))
                        .unwrap_or_else(|e| panic!("save failed in round {}: {}", i, e));
                    let bytes = store
                        .load(&id)
                        .unwrap_or_else(|e| panic!("lost {} in round {}: {}", id, i, e))
                        .read_to_vec()
                        .unwrap();
                    assert_eq!(bytes, b"churn");
                    assert!(store.delete(&id).unwrap());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let stats = store.stats().unwrap();
    assert_eq!(stats.blob_count, 0);
    assert_eq!(stats.marker_count, 0);
    let leftovers = walkdir::WalkDir::new(store.data_dir())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count();
    assert_eq!(leftovers, 0);
}

//! Concurrency tests for FlushableSet.
//!
//! These tests run producers on a multi-threaded runtime and verify that no
//! element is lost or flushed twice.
//! Run with: cargo test --test concurrency_tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flushable_set::{BoxError, FlushableSet, FlushableSetError, FlushableSetOptions};

type Batches = Arc<Mutex<Vec<Vec<u64>>>>;

fn create_async_set(max_size: usize) -> (FlushableSet<u64>, Batches) {
    let batches: Batches = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    let options = FlushableSetOptions::new()
        .with_max_size(max_size)
        .on_flush_async(move |set: &FlushableSet<u64>| {
            let set = set.clone();
            let sink = Arc::clone(&sink);
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                sink.lock().unwrap().push(set.snapshot());
                Ok::<(), BoxError>(())
            }
        });
    (FlushableSet::new(options).unwrap(), batches)
}

/// Every produced value is in exactly one batch or still buffered.
fn assert_no_loss_no_duplicates(set: &FlushableSet<u64>, batches: &Batches, expected: usize) {
    let batches = batches.lock().unwrap();
    let mut seen = HashSet::new();
    for batch in batches.iter() {
        for value in batch {
            assert!(seen.insert(*value), "value {} flushed twice", value);
        }
    }
    for value in set.snapshot() {
        assert!(seen.insert(value), "value {} flushed and still buffered", value);
    }
    assert_eq!(seen.len(), expected, "values were lost");
}

// =============================================================================
// Parallel add_async
// =============================================================================

/// Parallel producers never see FlushInProgress from add_async.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_add_async_loses_nothing() {
    let (set, batches) = create_async_set(8);
    let producers = 8u64;
    let per_producer = 50u64;

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let set = set.clone();
            tokio::spawn(async move {
                for i in 0..per_producer {
                    match set.add_async(p * 1_000 + i).await {
                        Ok(_) => {}
                        Err(FlushableSetError::FlushInProgress) => {
                            panic!("add_async must wait instead of rejecting")
                        }
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    if let Some(signal) = set.flush_signal() {
        signal.await.unwrap();
    }

    assert_no_loss_no_duplicates(&set, &batches, (producers * per_producer) as usize);
    for batch in batches.lock().unwrap().iter() {
        assert_eq!(batch.len(), 8, "each flush carries exactly max_size elements");
    }
    assert!(set.len() <= 8);
}

/// Mixed add and add_async: add may be rejected, but nothing accepted is lost.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_add_and_add_async() {
    let (set, batches) = create_async_set(4);
    let accepted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4u64)
        .map(|p| {
            let set = set.clone();
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                for i in 0..40u64 {
                    let value = p * 1_000 + i;
                    if i % 2 == 0 {
                        set.add_async(value).await.unwrap();
                        accepted.fetch_add(1, Ordering::SeqCst);
                    } else {
                        match set.add(value) {
                            Ok(_) => {
                                accepted.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(FlushableSetError::FlushInProgress) => {}
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    // Deferred values from plain `add` land when their flush settles.
    while set.is_flushing() {
        tokio::task::yield_now().await;
    }

    assert_no_loss_no_duplicates(&set, &batches, accepted.load(Ordering::SeqCst));
}

/// Threads hammering a synchronous sink.
#[test]
fn parallel_sync_flushes_partition_input() {
    let flushed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&flushed);
    let options = FlushableSetOptions::new()
        .with_max_size(16)
        .on_flush(move |set: &FlushableSet<u64>| {
            sink.lock().unwrap().push(set.snapshot());
            Ok::<(), BoxError>(())
        });
    let set = FlushableSet::new(options).unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..6u64)
        .map(|t| {
            let set = set.clone();
            let accepted = Arc::clone(&accepted);
            std::thread::spawn(move || {
                for i in 0..200u64 {
                    let value = t * 10_000 + i;
                    // Rejected while another thread's callback runs; retry.
                    loop {
                        match set.add(value) {
                            Ok(_) => break,
                            Err(FlushableSetError::FlushInProgress) => std::thread::yield_now(),
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let batches = flushed.lock().unwrap();
    let mut seen = HashSet::new();
    for batch in batches.iter() {
        assert_eq!(batch.len(), 16);
        for value in batch {
            assert!(seen.insert(*value));
        }
    }
    for value in set.snapshot() {
        assert!(seen.insert(value));
    }
    assert_eq!(seen.len(), accepted.load(Ordering::SeqCst));
    assert_eq!(seen.len(), 6 * 200);
}

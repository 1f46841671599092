//! Buffers generated events in front of a slow asynchronous sink.
//!
//! Run with: FLUSHABLE_SET_MAX_SIZE=50 RUST_LOG=flushable_set=debug cargo run --example batch_sink

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flushable_set::{BoxError, FlushableSet, FlushableSetOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("batch_sink=info".parse()?))
        .init();

    let mut options = FlushableSetOptions::<u64>::from_env();
    if options.max_size.is_none() {
        options.max_size = Some(100);
    }

    let delivered = Arc::new(AtomicUsize::new(0));
    let sink_total = Arc::clone(&delivered);
    let options = options.on_flush_async(move |set: &FlushableSet<u64>| {
        let set = set.clone();
        let sink_total = Arc::clone(&sink_total);
        async move {
            let batch = set.snapshot();
            // Stand-in for a batch insert or network send.
            tokio::time::sleep(Duration::from_millis(20)).await;
            sink_total.fetch_add(batch.len(), Ordering::SeqCst);
            tracing::info!(events = batch.len(), "Delivered batch");
            Ok::<(), BoxError>(())
        }
    });

    let set = FlushableSet::new(options)?;
    tracing::info!(max_size = ?set.max_size(), "Buffer ready");

    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let set = set.clone();
            tokio::spawn(async move {
                for i in 0..250u64 {
                    set.add_async(p * 1_000 + i).await?;
                }
                Ok::<(), flushable_set::FlushableSetError>(())
            })
        })
        .collect();

    for producer in producers {
        producer.await??;
    }

    if let Some(signal) = set.flush()? {
        signal.await?;
    }

    tracing::info!(
        delivered = delivered.load(Ordering::SeqCst),
        "All events delivered"
    );

    Ok(())
}

//! End-to-end pipeline runs: delivery, ordering, fail-fast and cancellation

mod common;

use common::builders::numbers_pipeline;
use common::collectors::Collected;
use common::within_timeout;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tileworks::pipeline::{worker_index, PipelineBuilder, PipelineError, QueueWriter, WorkQueue};
use tileworks::stats::{InMemoryStats, StageKind};
use tileworks::storage::{LongStore, StoreOptions};

#[test]
fn test_every_item_delivered_once() {
    let (source, stats) = numbers_pipeline("deliver", 950);
    let collected = Collected::new();

    let summary = source
        .add_buffer("queue", 100, 100)
        .unwrap()
        .sink_to_consumer("collect", 1, collected.consumer())
        .unwrap()
        .await_completion()
        .unwrap();

    assert_eq!(collected.len(), 950);
    let counts = collected.counts();
    assert_eq!(counts.len(), 950);
    assert!(counts.values().all(|&n| n == 1));
    assert_eq!(collected.sorted(), (0..950).collect::<Vec<_>>());

    let kinds: Vec<_> = summary.stages.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![StageKind::Generator, StageKind::Buffer, StageKind::Sink]
    );
    assert_eq!(stats.stages("deliver").len(), 3);
}

#[test]
fn test_order_preserved_at_concurrency_one() {
    let (source, _stats) = numbers_pipeline("ordered", 5_000);
    let collected = Collected::new();

    source
        .add_buffer("raw", 64, 8)
        .unwrap()
        .add_worker("plus_one", 1, |input, output| {
            while let Some(item) = input.get()? {
                output.accept(item + 1)?;
            }
            Ok(())
        })
        .unwrap()
        .add_buffer("shifted", 64, 8)
        .unwrap()
        .sink_to_consumer("collect", 1, collected.consumer())
        .unwrap()
        .await_completion()
        .unwrap();

    assert_eq!(collected.items(), (1..=5_000).collect::<Vec<_>>());
}

#[test]
fn test_multi_stage_fan_out() {
    let (source, stats) = numbers_pipeline("fan_out", 20_000);
    let collected = Collected::new();

    let summary = source
        .add_buffer("ids", 1_000, 50)
        .unwrap()
        .add_worker("split", 4, |input, output| {
            for item in input {
                let item = item?;
                output.accept(item * 2)?;
                output.accept(item * 2 + 1)?;
            }
            Ok(())
        })
        .unwrap()
        .add_buffer("halves", 1_000, 50)
        .unwrap()
        .sink_to_consumer("collect", 3, collected.consumer())
        .unwrap()
        .await_completion()
        .unwrap();

    assert_eq!(collected.sorted(), (0..40_000).collect::<Vec<_>>());
    let split = summary.stage("split").unwrap();
    assert_eq!(split.concurrency, 4);
    assert_eq!(split.items_in, 20_000);
    assert_eq!(split.items_out, 40_000);
    let halves = summary.stage("halves").unwrap();
    assert!(halves.pending_watermark.unwrap() >= 1);
    assert_eq!(halves.capacity, Some(1_000));
    assert_eq!(stats.pipelines().len(), 1);
}

#[test]
fn test_sink_failure_returns_that_error_promptly() {
    let (source, stats) = numbers_pipeline("failing", 10);
    let started = Instant::now();

    let result = within_timeout(move || {
        source
            .add_buffer("queue", 2, 1)
            .unwrap()
            .sink_to("fail_on_fifth", 1, |input| {
                let mut seen = 0;
                while let Some(item) = input.get()? {
                    seen += 1;
                    if seen == 5 {
                        anyhow::bail!("item {} rejected", item);
                    }
                }
                Ok(())
            })
            .unwrap()
            .await_completion()
    });

    match result {
        Err(PipelineError::Stage { stage, source }) => {
            assert_eq!(stage, "fail_on_fifth");
            assert_eq!(source.to_string(), "item 4 rejected");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(started.elapsed() < common::test_timeout());
    assert_eq!(stats.failures().len(), 1);
    assert!(stats.pipelines().is_empty());
}

#[test]
fn test_failure_unblocks_busy_generator() {
    let stats = InMemoryStats::new();
    let emitted = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&emitted);

    let result = within_timeout(move || {
        PipelineBuilder::new("endless", stats)
            .from_generator("forever", move |output| {
                for i in 0u64.. {
                    output.accept(i)?;
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            })
            .add_buffer("queue", 16, 4)
            .unwrap()
            .add_worker("explode", 2, |input, _output: &mut QueueWriter<u64>| {
                if let Some(item) = input.get()? {
                    anyhow::bail!("worker {:?} gave up on {}", worker_index(), item);
                }
                Ok(())
            })
            .unwrap()
            .add_buffer("unused", 16, 4)
            .unwrap()
            .sink_to_consumer("drain", 1, |_| Ok(()))
            .unwrap()
            .await_completion()
    });

    let err = result.unwrap_err();
    assert_eq!(err.stage(), Some("explode"));
    assert!(err.to_string().contains("gave up"));
    // every thread has been joined, so the generator is no longer emitting
    let stopped_at = emitted.load(Ordering::Relaxed);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(emitted.load(Ordering::Relaxed), stopped_at);
}

#[test]
fn test_panicking_stage_is_a_failure() {
    let (source, _stats) = numbers_pipeline("panicky", 100);

    let result = within_timeout(move || {
        source
            .add_buffer("queue", 10, 2)
            .unwrap()
            .sink_to_consumer("panic_at_42", 2, |item| {
                if item == 42 {
                    panic!("cannot handle {}", item);
                }
                Ok(())
            })
            .unwrap()
            .await_completion()
    });

    match result {
        Err(PipelineError::Panic { stage, message }) => {
            assert_eq!(stage, "panic_at_42");
            assert_eq!(message, "cannot handle 42");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_external_cancellation() {
    let (source, stats) = numbers_pipeline("deadline", u64::MAX);
    let pipeline = source
        .add_buffer("queue", 8, 2)
        .unwrap()
        .sink_to_consumer("slow", 1, |_| {
            std::thread::sleep(Duration::from_millis(1));
            Ok(())
        })
        .unwrap();

    let token = pipeline.cancellation();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        token.cancel();
    });

    let result = within_timeout(move || pipeline.await_completion());
    canceller.join().unwrap();
    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert_eq!(stats.failures().len(), 1);
}

#[test]
fn test_first_error_wins_over_later_ones() {
    let (source, stats) = numbers_pipeline("many_failures", 1_000);
    let failures = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&failures);

    let result = within_timeout(move || {
        source
            .add_buffer("queue", 100, 10)
            .unwrap()
            .sink_to("all_fail", 4, move |input| {
                let item = input.get()?.unwrap_or_default();
                record.lock().push(item);
                anyhow::bail!("failure {}", item)
            })
            .unwrap()
            .await_completion()
    });

    let err = result.unwrap_err();
    assert!(!failures.lock().is_empty());
    assert!(err
        .to_string()
        .starts_with("Stage 'all_fail' failed: failure "));
    assert_eq!(stats.failures().len(), 1);
}

#[test]
fn test_pipeline_from_external_queue_into_store() {
    let queue = WorkQueue::new("external", 256, 32, Default::default()).unwrap();
    let producers: Vec<_> = (0..2u64)
        .map(|p| {
            let mut writer = queue.writer().unwrap();
            std::thread::spawn(move || {
                for i in 0..1_000u64 {
                    writer.accept(p * 1_000 + i).unwrap();
                }
                writer.close().unwrap();
            })
        })
        .collect();

    let store = Arc::new(Mutex::new(LongStore::new(StoreOptions::heap(512)).unwrap()));
    let sink = Arc::clone(&store);
    let summary = PipelineBuilder::new("from_queue", InMemoryStats::new())
        .read_from_queue(queue)
        .sink_to_consumer("store", 1, move |value| {
            sink.lock().append(value)?;
            Ok(())
        })
        .unwrap()
        .await_completion()
        .unwrap();
    for producer in producers {
        producer.join().unwrap();
    }

    let store = store.lock();
    assert_eq!(store.size(), 2_000);
    let mut values: Vec<u64> = store.iter().collect();
    values.sort_unstable();
    assert_eq!(values, (0..2_000).collect::<Vec<_>>());
    assert_eq!(summary.stage("external").unwrap().items_in, 2_000);
}

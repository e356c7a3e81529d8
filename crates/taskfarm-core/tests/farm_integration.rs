//! End-to-end farm runs over an in-process cluster.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskfarm_core::{BytesCodec, DataSource, Error, Farm, FarmConfig, JsonCodec, Role};
use taskfarm_transport::LocalCluster;

type RankOutcome = Result<taskfarm_core::FarmReport, Error>;

fn run_increment_farm(
    size: usize,
    items: Vec<u64>,
    config: FarmConfig,
) -> (Vec<RankOutcome>, Vec<u64>, Vec<String>) {
    let results = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let outputs = {
        let results = results.clone();
        let errors = errors.clone();
        LocalCluster::run(size, move |transport| {
            let results = results.clone();
            let errors = errors.clone();
            Farm::builder(JsonCodec)
                .with_config(config.clone())
                .with_items(items.clone())
                .with_job(|item: u64| Ok(item + 1))
                .on_result(move |result: u64| {
                    results.lock().unwrap().push(result);
                    Ok(())
                })
                .on_error(move |error| {
                    errors.lock().unwrap().push(error.message);
                    Ok(())
                })
                .build()
                .unwrap()
                .run(&transport)
        })
        .unwrap()
    };

    let results = results.lock().unwrap().clone();
    let errors = errors.lock().unwrap().clone();
    (outputs, results, errors)
}

#[test]
fn test_single_rank_runs_jobs_inline() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let results = Arc::new(Mutex::new(Vec::new()));

    let outputs = {
        let cleanups = cleanups.clone();
        let results = results.clone();
        LocalCluster::run(1, move |transport| {
            let cleanups = cleanups.clone();
            let results = results.clone();
            Farm::builder(JsonCodec)
                .with_items(1u64..=10)
                .with_job(|item: u64| Ok(item + 1))
                .with_cleanup(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .on_result(move |result: u64| {
                    results.lock().unwrap().push(result);
                    Ok(())
                })
                .build()
                .unwrap()
                .run(&transport)
        })
        .unwrap()
    };

    let report = outputs.into_iter().next().unwrap().unwrap();
    assert_eq!(report.role, Role::Controller);
    assert_eq!(report.items_dispatched, 10);
    assert_eq!(report.items_processed, 10);
    assert_eq!(report.results_collected, 10);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(*results.lock().unwrap(), (2u64..=11).collect::<Vec<_>>());
}

#[test]
fn test_fewer_items_than_workers() {
    let (outputs, results, errors) =
        run_increment_farm(5, vec![10, 20, 30], FarmConfig::new());

    let mut sorted = results.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![11, 21, 31]);
    assert!(errors.is_empty());

    let controller = outputs[0].as_ref().unwrap();
    assert_eq!(controller.items_dispatched, 3);
    assert_eq!(controller.results_collected, 3);
    assert_eq!(controller.workers_shut_down, 4);
    assert!(controller
        .collected_per_worker
        .values()
        .all(|&count| count <= 1));

    // Three workers processed one item each; one worker got none. Every
    // worker still came back, which means it received its shutdown.
    let mut processed: Vec<u64> = outputs[1..]
        .iter()
        .map(|outcome| outcome.as_ref().unwrap().items_processed)
        .collect();
    processed.sort_unstable();
    assert_eq!(processed, vec![0, 1, 1, 1]);
}

#[test]
fn test_single_worker_preserves_source_order() {
    let (outputs, results, _) = run_increment_farm(2, vec![7, 3, 9, 5], FarmConfig::new());

    // With one worker the dispatch order is the source order.
    assert_eq!(results, vec![8, 4, 10, 6]);
    assert_eq!(outputs[0].as_ref().unwrap().results_collected, 4);
    assert_eq!(outputs[1].as_ref().unwrap().items_processed, 4);
}

#[test]
fn test_job_failure_travels_the_error_channel() {
    let results = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let outputs = {
        let results = results.clone();
        let errors = errors.clone();
        LocalCluster::run(2, move |transport| {
            let results = results.clone();
            let errors = errors.clone();
            Farm::builder(JsonCodec)
                .with_items(vec![1u64, 2, 3])
                .with_job(|item: u64| {
                    if item == 2 {
                        Err("cannot digest two".into())
                    } else {
                        Ok(item + 1)
                    }
                })
                .on_result(move |result: u64| {
                    results.lock().unwrap().push(result);
                    Ok(())
                })
                .on_error(move |error| {
                    errors.lock().unwrap().push(error.message);
                    Ok(())
                })
                .build()
                .unwrap()
                .run(&transport)
        })
        .unwrap()
    };

    let controller = outputs[0].as_ref().unwrap();
    assert_eq!(controller.results_collected, 2);
    assert_eq!(controller.errors_reported, 1);
    assert_eq!(*results.lock().unwrap(), vec![2, 4]);
    assert_eq!(*errors.lock().unwrap(), vec!["cannot digest two".to_string()]);
    // All three items were processed despite the failure.
    assert_eq!(outputs[1].as_ref().unwrap().items_processed, 3);
}

#[test]
fn test_deadline_stops_an_endless_source() {
    let outputs = LocalCluster::run(2, |transport| {
        let mut next = 0u64;
        Farm::builder(JsonCodec)
            .with_config(FarmConfig::new().with_time_limit(Duration::from_millis(80)))
            .with_source(DataSource::from_fn(move || {
                next += 1;
                Some(next)
            }))
            .with_job(|item: u64| {
                std::thread::sleep(Duration::from_millis(2));
                Ok(item)
            })
            .build()
            .unwrap()
            .run(&transport)
    })
    .unwrap();

    let controller = outputs[0].as_ref().unwrap();
    assert!(controller.deadline_expired);
    assert!(controller.items_dispatched > 0);
    assert_eq!(controller.workers_shut_down, 1);
    // The worker saw the shutdown and exited cleanly.
    assert!(outputs[1].is_ok());
}

#[test]
fn test_deadline_before_any_work_is_an_error() {
    let outputs = LocalCluster::run(2, |transport| {
        let mut next = 0u64;
        Farm::builder(JsonCodec)
            .with_config(FarmConfig::new().with_time_limit(Duration::ZERO))
            .with_source(DataSource::from_fn(move || {
                next += 1;
                Some(next)
            }))
            .with_job(|item: u64| Ok(item))
            .build()
            .unwrap()
            .run(&transport)
    })
    .unwrap();

    assert!(matches!(outputs[0], Err(Error::DeadlineExceeded)));
    // Workers are still shut down cleanly before the error surfaces.
    let worker = outputs[1].as_ref().unwrap();
    assert_eq!(worker.items_processed, 0);
}

#[test]
fn test_empty_encoded_item_roundtrips() {
    let results = Arc::new(Mutex::new(Vec::new()));

    let outputs = {
        let results = results.clone();
        LocalCluster::run(2, move |transport| {
            let results = results.clone();
            Farm::builder(BytesCodec)
                .with_items(vec![Vec::new(), b"full".to_vec()])
                .with_job(|item: Vec<u8>| Ok(item))
                .on_result(move |result: Vec<u8>| {
                    results.lock().unwrap().push(result);
                    Ok(())
                })
                .build()
                .unwrap()
                .run(&transport)
        })
        .unwrap()
    };

    assert!(outputs[0].is_ok());
    // The zero-byte payload arrives as a zero-byte value, in order.
    assert_eq!(*results.lock().unwrap(), vec![Vec::new(), b"full".to_vec()]);
}

#[test]
fn test_every_worker_gets_work_on_a_long_run() {
    let outputs = LocalCluster::run(5, |transport| {
        Farm::builder(JsonCodec)
            .with_items(0u64..40)
            .with_job(|item: u64| {
                std::thread::sleep(Duration::from_millis(2));
                Ok(item)
            })
            .build()
            .unwrap()
            .run(&transport)
    })
    .unwrap();

    let controller = outputs[0].as_ref().unwrap();
    assert_eq!(controller.items_dispatched, 40);
    assert_eq!(controller.collected_per_worker.len(), 4);
    assert_eq!(controller.collected_per_worker.values().sum::<u64>(), 40);

    let processed: Vec<u64> = outputs[1..]
        .iter()
        .map(|outcome| outcome.as_ref().unwrap().items_processed)
        .collect();
    assert!(processed.iter().all(|&count| count >= 1));
    assert_eq!(processed.iter().sum::<u64>(), 40);
}

#[test]
fn test_init_and_cleanup_run_once_per_worker() {
    let inits = Arc::new(AtomicUsize::new(0));
    let cleanups = Arc::new(AtomicUsize::new(0));

    let outputs = {
        let inits = inits.clone();
        let cleanups = cleanups.clone();
        LocalCluster::run(3, move |transport| {
            let inits = inits.clone();
            let cleanups = cleanups.clone();
            Farm::builder(JsonCodec)
                .with_items(vec![1u64, 2, 3, 4])
                .with_init(move || {
                    inits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .with_job(|item: u64| Ok(item))
                .with_cleanup(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build()
                .unwrap()
                .run(&transport)
        })
        .unwrap()
    };

    assert!(outputs.iter().all(|outcome| outcome.is_ok()));
    assert_eq!(inits.load(Ordering::SeqCst), 2);
    assert_eq!(cleanups.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failing_delivery_handlers_do_not_abort_the_run() {
    let outputs = LocalCluster::run(2, |transport| {
        Farm::builder(JsonCodec)
            .with_items(vec![1u64, 2, 3])
            .with_job(|item: u64| Ok(item))
            .on_result(|_result: u64| Err("delivery handler always fails".into()))
            .build()
            .unwrap()
            .run(&transport)
    })
    .unwrap();

    let controller = outputs[0].as_ref().unwrap();
    assert_eq!(controller.results_collected, 3);
    assert_eq!(controller.errors_reported, 0);
}

#[test]
fn test_empty_source_shuts_every_worker_down() {
    let (outputs, results, errors) = run_increment_farm(4, Vec::new(), FarmConfig::new());

    let controller = outputs[0].as_ref().unwrap();
    assert_eq!(controller.items_dispatched, 0);
    assert_eq!(controller.workers_shut_down, 3);
    assert!(results.is_empty());
    assert!(errors.is_empty());
    for outcome in &outputs[1..] {
        assert_eq!(outcome.as_ref().unwrap().items_processed, 0);
    }
}

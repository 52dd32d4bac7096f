//! Time-gated operators on the virtual and real-time schedulers

mod common;

use common::record;
use rivulet::{
    FlowError, Flux, RealTimeScheduler, Scheduler, StepVerifier, VirtualTimeScheduler,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;

const DAY: Duration = Duration::from_secs(86_400);

#[test]
fn test_interval_one_tick_per_day() {
    let clock = VirtualTimeScheduler::new();
    let handle = record(&Flux::interval(DAY, clock.clone()), u64::MAX);

    assert!(handle.items().is_empty());
    clock.advance(DAY);
    assert_eq!(handle.items(), vec![0]);
    clock.advance(DAY);
    assert_eq!(handle.items(), vec![0, 1]);

    handle.cancel();
    clock.advance(DAY * 5);
    assert_eq!(handle.items(), vec![0, 1]);
    assert_eq!(clock.pending(), 0);
}

#[test]
fn test_interval_take_with_verifier() {
    StepVerifier::with_virtual_time(|clock| Flux::interval(DAY, clock).take(3))
        .expect_subscription()
        .expect_no_event(DAY)
        .expect_next([0])
        .then_await(DAY * 2)
        .expect_next([1, 2])
        .verify_complete()
        .unwrap();
}

#[test]
fn test_interval_without_demand_overflows() {
    let clock = VirtualTimeScheduler::new();
    let handle = record(&Flux::interval(Duration::from_secs(1), clock.clone()), 1);

    clock.advance(Duration::from_secs(2));
    assert_eq!(handle.items(), vec![0]);
    assert!(matches!(handle.error(), Some(FlowError::Overflow(_))));
    assert_eq!(handle.terminal_count(), 1);
}

#[test]
fn test_interval_then_cancel() {
    StepVerifier::with_virtual_time(|clock| Flux::interval(DAY, clock))
        .expect_subscription()
        .then_await(DAY)
        .expect_next([0])
        .then_await(DAY)
        .expect_next([1])
        .then_cancel()
        .verify()
        .unwrap();
}

#[test]
fn test_delay_elements_preserves_order() {
    StepVerifier::with_virtual_time(|clock| {
        Flux::range(1, 4).delay_elements(Duration::from_millis(100), clock)
    })
    .expect_subscription()
    .expect_no_event(Duration::from_millis(100))
    .expect_next([1])
    .then_await(Duration::from_millis(300))
    .expect_next([2, 3, 4])
    .verify_complete()
    .unwrap();
}

#[test]
fn test_delayed_error_follows_last_item() {
    StepVerifier::with_virtual_time(|clock| {
        Flux::range(1, 2)
            .try_map(|n| {
                if n == 2 {
                    Err(std::io::Error::other("second"))
                } else {
                    Ok(n)
                }
            })
            .delay_elements(Duration::from_secs(1), clock)
    })
    .then_await(Duration::from_secs(1))
    .expect_next([1])
    .expect_error_of::<std::io::Error>()
    .verify()
    .unwrap();
}

#[test]
fn test_interval_on_real_time_scheduler() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_time()
        .build()
        .unwrap();
    let scheduler = RealTimeScheduler::new(runtime.handle().clone());
    let (tx, rx) = mpsc::channel();

    let handle = Flux::interval(Duration::from_millis(5), scheduler.clone())
        .take(3)
        .subscribe_with(
            move |n| tx.send(n).unwrap(),
            |e| panic!("unexpected {}", e),
            || {},
        );

    let ticks: Vec<u64> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
        .collect();
    assert_eq!(ticks, vec![0, 1, 2]);
    assert!(scheduler.now() >= Duration::from_millis(15));

    std::thread::sleep(Duration::from_millis(20));
    assert!(handle.is_disposed());
}

#[test]
fn test_real_time_verifier_with_delay() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .build()
        .unwrap();
    let scheduler = RealTimeScheduler::new(runtime.handle().clone());

    let flux = Flux::just(["a", "b"]).delay_elements(Duration::from_millis(10), scheduler);
    StepVerifier::create(flux)
        .timeout(Duration::from_secs(2))
        .expect_next(["a", "b"])
        .verify_complete()
        .unwrap();
}

#[test]
fn test_panicking_timer_task_becomes_scheduler_error() {
    let clock = VirtualTimeScheduler::new();
    let failed = Arc::new(AtomicBool::new(false));
    let flag = failed.clone();

    Flux::interval(Duration::from_secs(1), clock.clone()).subscribe_with(
        |n| {
            if n == 1 {
                panic!("tick handler failed");
            }
        },
        move |e| flag.store(matches!(e, FlowError::Scheduler(_)), Ordering::SeqCst),
        || {},
    );

    clock.advance(Duration::from_secs(3));
    assert!(failed.load(Ordering::SeqCst));
    assert_eq!(clock.pending(), 0);
}

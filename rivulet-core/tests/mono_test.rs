//! Mono behavior through the public API

mod common;

use common::record;
use parking_lot::Mutex;
use rivulet::{FlowError, Flux, Mono, StepVerifier, VirtualTimeScheduler};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_just_map() {
    StepVerifier::create(Mono::just("Hugo").map(|name| name.len()).into_flux())
        .expect_next([4])
        .verify_complete()
        .unwrap();
}

#[test]
fn test_empty_mono_success_hook_sees_none() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let mono = Mono::<i32>::empty().do_on_success(move |value| log.lock().push(value.copied()));

    let handle = record(&mono.into_flux(), u64::MAX);
    assert!(handle.completed());
    assert_eq!(*seen.lock(), vec![None]);
}

#[test]
fn test_success_hook_runs_once_per_subscription() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let mono = Mono::just(7).do_on_success(move |value| log.lock().push(value.copied()));

    mono.subscribe_next(|_| {});
    mono.subscribe_next(|_| {});
    assert_eq!(*seen.lock(), vec![Some(7), Some(7)]);
}

#[test]
fn test_from_flux_takes_first_item() {
    let (source, requests) = common::record_requests(&Flux::range(10, 100));
    StepVerifier::create(Mono::from_flux(source).into_flux())
        .expect_next([10])
        .verify_complete()
        .unwrap();
    assert_eq!(*requests.lock(), vec![1]);
}

#[test]
fn test_flat_map_chains_monos() {
    let mono = Mono::just(3).flat_map(|n| Mono::just(n * 2)).map(|n| n + 1);
    StepVerifier::create(Flux::from(mono))
        .expect_next([7])
        .verify_complete()
        .unwrap();
}

#[test]
fn test_flat_map_many_expands() {
    StepVerifier::create(Mono::just(3).flat_map_many(|n| Flux::range(1, n as u64)))
        .expect_next([1, 2, 3])
        .verify_complete()
        .unwrap();
}

#[test]
fn test_error_recovery() {
    let failing = Mono::<i32>::error(FlowError::msg("lookup failed"));

    StepVerifier::create(failing.on_error_return(-1).into_flux())
        .expect_next([-1])
        .verify_complete()
        .unwrap();

    StepVerifier::create(
        failing
            .on_error_resume(|e| Mono::just(e.to_string().len() as i32))
            .into_flux(),
    )
    .expect_next_matches(|n| *n > 0)
    .verify_complete()
    .unwrap();
}

#[test]
fn test_do_on_error_observes_failure() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let log = errors.clone();
    let mono = Mono::<i32>::error(FlowError::msg("boom"))
        .do_on_error(move |e| log.lock().push(e.to_string()))
        .log("mono_test");

    StepVerifier::create(mono.into_flux())
        .expect_error_matching(|e| e.to_string().contains("boom"))
        .verify()
        .unwrap();
    assert_eq!(errors.lock().len(), 1);
}

#[test]
fn test_delayed_mono_on_virtual_time() {
    StepVerifier::with_virtual_time(|clock| {
        Mono::just("late")
            .into_flux()
            .delay_elements(Duration::from_secs(30), clock)
    })
    .expect_subscription()
    .expect_no_event(Duration::from_secs(30))
    .expect_next(["late"])
    .verify_complete()
    .unwrap();

    let clock = VirtualTimeScheduler::new();
    let handle = record(
        &Mono::just(1).into_flux().delay_elements(Duration::from_secs(1), clock.clone()),
        1,
    );
    assert!(handle.items().is_empty());
    clock.advance(Duration::from_secs(1));
    assert_eq!(handle.items(), vec![1]);
    assert!(handle.completed());
}

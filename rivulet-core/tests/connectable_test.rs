//! Hot multicasting through publish()/connect()

mod common;

use common::record;
use rivulet::{Flux, VirtualTimeScheduler};
use std::time::Duration;

const SECOND: Duration = Duration::from_secs(1);

#[test]
fn test_late_subscriber_misses_earlier_items() {
    let clock = VirtualTimeScheduler::new();
    let hot = Flux::interval(SECOND, clock.clone()).publish();

    let early = record(&hot.as_flux(), u64::MAX);
    let connection = hot.connect();
    clock.advance(SECOND * 2);

    let late = record(&hot.as_flux(), u64::MAX);
    assert_eq!(hot.subscriber_count(), 2);
    clock.advance(SECOND * 2);

    assert_eq!(early.items(), vec![0, 1, 2, 3]);
    assert_eq!(late.items(), vec![2, 3]);

    connection.dispose();
    clock.advance(SECOND * 3);
    assert_eq!(early.items(), vec![0, 1, 2, 3]);
    assert_eq!(clock.pending(), 0);
}

#[test]
fn test_delayed_source_shared_between_subscribers() {
    let clock = VirtualTimeScheduler::new();
    let hot = Flux::range(1, 6)
        .delay_elements(Duration::from_millis(500), clock.clone())
        .publish();

    let first = record(&hot.as_flux(), u64::MAX);
    hot.connect();
    clock.advance(Duration::from_millis(1_000));
    let second = record(&hot.as_flux(), u64::MAX);
    clock.advance(Duration::from_secs(5));

    assert_eq!(first.items(), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(second.items(), vec![3, 4, 5, 6]);
    assert!(first.completed());
    assert!(second.completed());
}

#[test]
fn test_cancelled_subscriber_leaves_group_running() {
    let clock = VirtualTimeScheduler::new();
    let hot = Flux::interval(SECOND, clock.clone()).publish();

    let stays = record(&hot.as_flux(), u64::MAX);
    let leaves = record(&hot.as_flux(), u64::MAX);
    hot.connect();
    clock.advance(SECOND);

    leaves.cancel();
    clock.advance(SECOND * 2);

    assert_eq!(stays.items(), vec![0, 1, 2]);
    assert_eq!(leaves.items(), vec![0]);
    assert_eq!(hot.subscriber_count(), 1);
}

#[test]
fn test_subscriber_after_completion_sees_terminal() {
    let hot = Flux::range(1, 3).publish();
    let early = record(&hot.as_flux(), u64::MAX);
    hot.connect();

    let late = record(&hot.as_flux(), u64::MAX);
    assert_eq!(early.items(), vec![1, 2, 3]);
    assert!(late.items().is_empty());
    assert!(late.completed());
    assert_eq!(late.terminal_count(), 1);
}

#[test]
fn test_errors_reach_every_subscriber() {
    let hot = Flux::range(1, 3)
        .try_map(|n| {
            if n == 3 {
                Err(std::io::Error::other("bad item"))
            } else {
                Ok(n)
            }
        })
        .publish();
    let a = record(&hot.as_flux(), u64::MAX);
    let b = record(&hot.as_flux(), u64::MAX);
    hot.connect();

    for handle in [&a, &b] {
        assert_eq!(handle.items(), vec![1, 2]);
        assert!(handle.error().is_some_and(|e| e.is::<std::io::Error>()));
    }
}

#[test]
fn test_operators_after_publish() {
    let hot = Flux::range(1, 10).publish();
    let evens = record(&hot.as_flux().filter(|n| n % 2 == 0).take(3), u64::MAX);
    let all = record(&hot.as_flux(), u64::MAX);
    hot.connect();

    assert_eq!(evens.items(), vec![2, 4, 6]);
    assert!(evens.completed());
    assert_eq!(all.items(), (1..=10).collect::<Vec<_>>());
}

mod common;

use futures::executor::block_on;
use parking_lot::Mutex;
use pooled_promise::{CancelationSource, Deferred, Failure, Panicked, UsageError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn counter(source: &CancelationSource) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&hits);
    // dropping the registration keeps the callback registered
    let _registration = source
        .token()
        .register(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    hits
}

#[test]
fn linked_sources_cancel_downstream_only() {
    let _trace = common::trace();
    let a = CancelationSource::new();
    let b = CancelationSource::new();
    let c = CancelationSource::linked([&a.token(), &b.token()]);
    let hits = counter(&c);

    a.cancel().unwrap();
    assert!(c.is_canceled());
    assert!(!b.is_canceled());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    b.cancel().unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn canceling_a_linked_source_leaves_its_inputs() {
    let a = CancelationSource::new();
    let b = CancelationSource::new();
    let c = CancelationSource::linked([&a.token(), &b.token()]);
    c.cancel().unwrap();
    assert!(!a.is_canceled());
    assert!(!b.is_canceled());
}

#[test]
fn linking_the_same_token_twice_cancels_once() {
    let a = CancelationSource::new();
    let token = a.token();
    let c = CancelationSource::linked([&token, &token]);
    let hits = counter(&c);
    a.cancel().unwrap();
    a.cancel().unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn callbacks_run_in_registration_order() {
    let source = CancelationSource::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let registrations: Vec<_> = (0..5)
        .map(|index| {
            let order = Arc::clone(&order);
            source.token().register(move || order.lock().push(index)).unwrap()
        })
        .collect();

    source.cancel().unwrap();
    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    assert!(registrations.into_iter().all(|registration| !registration.unregister()));
}

#[test]
fn panicking_callbacks_are_aggregated() {
    let source = CancelationSource::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&hits);
    let _first = source.token().register(|| panic!("first")).unwrap();
    let _middle = source
        .token()
        .register(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let _last = source.token().register(|| panic!("last")).unwrap();

    let aggregate = source.cancel().unwrap_err();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let reasons: Vec<_> = aggregate
        .errors()
        .iter()
        .filter_map(|error| error.reason::<Panicked>().cloned())
        .collect();
    assert_eq!(reasons, [Panicked("first".into()), Panicked("last".into())]);
}

#[test]
fn linked_panics_reach_the_upstream_canceller() {
    let upstream = CancelationSource::new();
    let downstream = CancelationSource::linked([&upstream.token()]);
    let _boom = downstream.token().register(|| panic!("downstream")).unwrap();

    let aggregate = upstream.cancel().unwrap_err();
    assert_eq!(aggregate.errors().len(), 1);
    assert_eq!(
        aggregate.errors()[0].reason::<Panicked>(),
        Some(&Panicked("downstream".into()))
    );
}

#[test]
fn canceling_a_deferred_makes_its_handles_stale() {
    let source = CancelationSource::new();
    let (deferred, promise) = Deferred::<u8>::with_cancelation(&source.token());
    source.cancel().unwrap();
    assert_eq!(deferred.resolve(1), Err(UsageError::StaleHandle));
    assert!(matches!(block_on(promise), Err(Failure::Canceled)));
}

#[test]
fn already_canceled_tokens_cancel_immediately() {
    let source = CancelationSource::new();
    source.cancel().unwrap();
    let (deferred, promise) = Deferred::<u8>::new();
    let guarded = promise.with_cancelation(&source.token());
    assert_eq!(guarded.is_completed(), Ok(true));
    deferred.resolve(1).unwrap();
    assert!(matches!(block_on(guarded), Err(Failure::Canceled)));
}

#[test]
fn disposed_tokens_never_cancel() {
    let source = CancelationSource::new();
    let token = source.token();
    source.dispose();
    let (deferred, promise) = Deferred::<u8>::with_cancelation(&token);
    deferred.resolve(1).unwrap();
    assert_eq!(block_on(promise).unwrap(), 1);
}

#[test]
fn resolve_and_cancel_race_has_one_winner() {
    let _trace = common::trace();
    for _ in 0..500 {
        let source = CancelationSource::new();
        let (deferred, promise) = Deferred::<u8>::with_cancelation(&source.token());
        let start = Arc::new(Barrier::new(2));

        let gate = Arc::clone(&start);
        let canceller = thread::spawn(move || {
            gate.wait();
            source.cancel().unwrap();
        });
        start.wait();
        let resolved = deferred.try_resolve(1);
        canceller.join().expect("The canceller thread has panicked");

        match (resolved, block_on(promise)) {
            (true, Ok(1)) | (false, Err(Failure::Canceled)) => {}
            (resolved, outcome) => panic!("resolved: {resolved}, outcome: {outcome:?}"),
        }
    }
}

#[test]
fn token_and_source_race_on_a_chained_promise() {
    for _ in 0..500 {
        let source = CancelationSource::new();
        let (deferred, promise) = Deferred::<u8>::new();
        let guarded = promise.with_cancelation(&source.token());
        let start = Arc::new(Barrier::new(2));

        let gate = Arc::clone(&start);
        let producer = thread::spawn(move || {
            gate.wait();
            deferred.resolve(1).unwrap();
        });
        start.wait();
        source.cancel().unwrap();
        producer.join().expect("The producer thread has panicked");

        match block_on(guarded) {
            Ok(1) | Err(Failure::Canceled) => {}
            other => panic!("unexpected {other:?}"),
        }
    }
}

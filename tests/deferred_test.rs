mod common;

use futures::executor::block_on;
use pooled_promise::{Deferred, DeferredDropped, Failure, Promise, UsageError};
use std::thread;

#[test]
fn test_deferred_resolve() {
    let _trace = common::trace();
    let (deferred, promise) = Deferred::<String>::new();
    let task1 = thread::spawn(move || block_on(async { promise.await.unwrap() }));
    let task2 = thread::spawn(move || deferred.resolve(String::from("🍓")));

    task2.join().expect("The task2 thread has panicked").unwrap();
    assert_eq!(task1.join().expect("The task1 thread has panicked"), "🍓");
}

#[test]
fn test_deferred_reject() {
    let _trace = common::trace();
    let (deferred, promise) = Deferred::<String>::new();
    let task = thread::spawn(move || block_on(promise));
    deferred.reject(String::from("💥")).unwrap();

    let failure = task.join().expect("The task thread has panicked").unwrap_err();
    let rejection = failure.rejection().expect("rejected, not canceled");
    assert_eq!(rejection.reason::<String>().map(String::as_str), Some("💥"));
    assert!(rejection.is_handled());
}

#[test]
fn test_deferred_unresolved() {
    let _trace = common::trace();
    let (deferred, promise) = Deferred::<String>::new();
    let task1 = thread::spawn(move || block_on(promise));
    let task2 = thread::spawn(move || drop(deferred));

    task2.join().expect("The task2 thread has panicked");
    let failure = task1.join().expect("The task1 thread has panicked").unwrap_err();
    assert_eq!(
        failure.rejection().and_then(|r| r.reason::<DeferredDropped>()),
        Some(&DeferredDropped)
    );
}

#[test]
fn test_deferred_no_consumer() {
    let _trace = common::trace();
    let (deferred, promise) = Deferred::<String>::new();
    drop(promise);
    assert!(deferred.try_resolve(String::from("🍓")));
    assert!(!deferred.is_valid());
}

#[test]
fn clones_race_and_only_one_wins() {
    let (deferred, promise) = Deferred::<usize>::new();
    let tasks: Vec<_> = (0..8)
        .map(|index| {
            let deferred = deferred.clone();
            thread::spawn(move || deferred.try_resolve(index))
        })
        .collect();
    drop(deferred);

    let wins: Vec<_> = tasks
        .into_iter()
        .enumerate()
        .filter_map(|(index, task)| task.join().expect("producer panicked").then_some(index))
        .collect();
    assert_eq!(wins.len(), 1);
    assert_eq!(block_on(promise).unwrap(), wins[0]);
}

#[test]
fn settled_constructors() {
    assert_eq!(block_on(Promise::resolved(1_u8)).unwrap(), 1);
    assert!(matches!(block_on(Promise::<u8>::canceled()), Err(Failure::Canceled)));
    let failure = block_on(Promise::<u8>::rejected(UsageError::EmptyCombinator)).unwrap_err();
    assert_eq!(
        failure.rejection().and_then(|r| r.reason::<UsageError>()),
        Some(&UsageError::EmptyCombinator)
    );
}

#[test]
fn stale_deferred_calls_are_no_ops() {
    let (deferred, promise) = Deferred::<u8>::new();
    deferred.resolve(1).unwrap();
    assert_eq!(deferred.resolve(2), Err(UsageError::StaleHandle));
    assert_eq!(deferred.cancel(), Err(UsageError::StaleHandle));
    assert!(!deferred.try_reject("late"));
    assert_eq!(block_on(promise).unwrap(), 1);
}

mod common;

use futures::executor::block_on;
use pooled_promise::{Deferred, Failure, Outcome, State};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;
const ROUNDS: usize = 200;

#[test]
fn one_transition_under_contention() {
    let _trace = common::trace();
    for _ in 0..ROUNDS {
        let (deferred, promise) = Deferred::<usize>::new();
        let start = Arc::new(Barrier::new(THREADS));
        let tasks: Vec<_> = (0..THREADS)
            .map(|index| {
                let deferred = deferred.clone();
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    match index % 3 {
                        0 => deferred.try_resolve(index).then_some(State::Resolved),
                        1 => deferred.try_reject(index).then_some(State::Rejected),
                        _ => deferred.try_cancel().then_some(State::Canceled),
                    }
                })
            })
            .collect();
        drop(deferred);

        let winners: Vec<State> = tasks
            .into_iter()
            .filter_map(|task| task.join().expect("producer panicked"))
            .collect();
        assert_eq!(winners.len(), 1);

        let state = match block_on(promise) {
            Ok(_) => State::Resolved,
            Err(Failure::Rejected(_)) => State::Rejected,
            Err(Failure::Canceled) => State::Canceled,
        };
        assert_eq!(state, winners[0]);
    }
}

#[test]
fn waiter_runs_once_under_contention() {
    for _ in 0..ROUNDS {
        let calls = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&calls);
        let (deferred, promise) = Deferred::<usize>::new();
        let observed = promise.continue_with(move |outcome| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(outcome.state())
        });

        let start = Arc::new(Barrier::new(THREADS));
        let tasks: Vec<_> = (0..THREADS)
            .map(|index| {
                let deferred = deferred.clone();
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    if index % 2 == 0 {
                        deferred.try_resolve(index);
                    } else {
                        deferred.try_cancel();
                    }
                })
            })
            .collect();
        drop(deferred);
        for task in tasks {
            task.join().expect("producer panicked");
        }

        let state = block_on(observed).unwrap();
        assert!(matches!(state, State::Resolved | State::Canceled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn attach_races_completion() {
    for round in 0..ROUNDS * 5 {
        let (deferred, promise) = Deferred::<usize>::new();
        let start = Arc::new(Barrier::new(2));

        let gate = Arc::clone(&start);
        let consumer = thread::spawn(move || {
            gate.wait();
            block_on(promise.then(|value| value * 2))
        });
        start.wait();
        deferred.resolve(round).unwrap();

        let doubled = consumer.join().expect("The consumer thread has panicked");
        assert_eq!(doubled.unwrap(), round * 2);
    }
}

#[test]
fn preserved_promises_under_contention() {
    for _ in 0..ROUNDS {
        let (deferred, promise) = Deferred::<usize>::new();
        let shared = promise.preserve();
        let start = Arc::new(Barrier::new(THREADS + 1));
        let tasks: Vec<_> = (0..THREADS)
            .map(|_| {
                let shared = shared.clone();
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    block_on(shared.duplicate())
                })
            })
            .collect();
        start.wait();
        deferred.resolve(7).unwrap();

        for task in tasks {
            assert_eq!(task.join().expect("consumer panicked").unwrap(), 7);
        }
    }
}

#[test]
fn outcomes_map_through_pooled_chains() {
    // the same node types get recycled across rounds
    for round in 0..ROUNDS {
        let (deferred, promise) = Deferred::<usize>::new();
        let chained = promise
            .then(|value| value + 1)
            .continue_with(|outcome: Outcome<usize>| Ok(outcome.state()));
        deferred.resolve(round).unwrap();
        assert_eq!(block_on(chained).unwrap(), State::Resolved);
    }
}

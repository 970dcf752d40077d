mod common;

use futures::executor::block_on;
use pooled_promise::{all_settled, first, merge, race, Deferred, Failure, Outcome, Promise, State};
use std::thread;

fn three() -> ([Deferred<i32>; 3], [Promise<i32>; 3]) {
    let (a, pa) = Deferred::new();
    let (b, pb) = Deferred::new();
    let (c, pc) = Deferred::new();
    ([a, b, c], [pa, pb, pc])
}

#[test]
fn merge_settles_with_the_rejection() {
    let _trace = common::trace();
    let ([a, b, c], inputs) = three();
    let all = merge(inputs);

    a.resolve(10).unwrap();
    b.reject("err").unwrap();
    c.cancel().unwrap();

    let failure = block_on(all).unwrap_err();
    assert_eq!(failure.rejection().and_then(|r| r.reason::<&str>()), Some(&"err"));
}

#[test]
fn race_follows_the_clock() {
    let ([a, b, c], inputs) = three();
    let winner = race(inputs);

    c.cancel().unwrap();
    a.resolve(10).unwrap();
    b.reject("err").unwrap();
    assert!(matches!(block_on(winner), Err(Failure::Canceled)));
}

#[test]
fn first_waits_for_a_value() {
    let ([a, b, c], inputs) = three();
    let winner = first(inputs);

    a.cancel().unwrap();
    b.reject("err").unwrap();
    assert_eq!(winner.is_completed(), Ok(false));
    c.resolve(5).unwrap();
    assert_eq!(block_on(winner).unwrap(), 5);
}

#[test]
fn all_settled_reports_each_input() {
    let ([a, b, c], inputs) = three();
    let settled = all_settled(inputs);

    c.cancel().unwrap();
    b.reject("err").unwrap();
    a.resolve(10).unwrap();

    let outcomes = block_on(settled).unwrap();
    assert!(matches!(outcomes[0], Outcome::Resolved(10)));
    assert_eq!(outcomes[1].state(), State::Rejected);
    assert!(outcomes[2].is_canceled());
}

#[test]
fn inputs_settled_from_many_threads() {
    let _trace = common::trace();
    for _ in 0..200 {
        let (producers, inputs): (Vec<_>, Vec<_>) = (0..8).map(|_| Deferred::<usize>::new()).unzip();
        let all = merge(inputs);
        let tasks: Vec<_> = producers
            .into_iter()
            .enumerate()
            .map(|(index, deferred)| thread::spawn(move || deferred.resolve(index).unwrap()))
            .collect();
        for task in tasks {
            task.join().expect("The producer thread has panicked");
        }
        assert_eq!(block_on(all).unwrap(), (0..8).collect::<Vec<_>>());
    }
}

#[test]
fn combinators_nest() {
    let inner = merge([Promise::resolved(1), Promise::resolved(2)]);
    let outer = race([inner, Promise::resolved(vec![3])]);
    assert_eq!(block_on(outer).unwrap(), vec![1, 2]);
}

#[test]
fn merge_takes_more_inputs_than_a_u16_counts() {
    let all = merge((0..70_000_u32).map(Promise::resolved));
    let values = block_on(all).unwrap();
    assert_eq!(values.len(), 70_000);
    assert!(values.iter().copied().eq(0..70_000));
}

#[test]
fn preserved_promises_take_more_waiters_than_a_u16_counts() {
    let (deferred, promise) = Deferred::<u32>::new();
    let shared = promise.preserve();
    let copies: Vec<_> = (0..70_000).map(|_| shared.duplicate()).collect();
    deferred.resolve(9).unwrap();
    assert!(copies.into_iter().all(|copy| block_on(copy).unwrap() == 9));
}

//! Combinators that wait on several promises at once.
//!
//! None of these cancel the inputs they stop caring about: once the result has
//! settled, later outcomes of its inputs are simply ignored.
use crate::{Context, EmptyRace, Promise};
use parking_lot::Mutex;
use std::sync::Arc;

struct Gather<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

/// Fulfills with every value in input order once all inputs have fulfilled.
/// The first rejection rejects the result.
///
/// # Examples
///
/// ```
/// use promise_chain::{all, Promise};
///
/// let joined = all(vec![Promise::<i32>::fulfilled(1), Promise::fulfilled(2)]);
/// assert_eq!(joined.value(), Some(vec![1, 2]));
/// ```
pub fn all<T, E>(promises: impl IntoIterator<Item = Promise<T, E>>) -> Promise<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let promises: Vec<_> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::fulfilled(Vec::new());
    }
    let ctx = Context::inline();
    let gather = Arc::new(Mutex::new(Gather {
        values: vec![None; promises.len()],
        remaining: promises.len(),
    }));
    Promise::new(|producer| {
        for (index, promise) in promises.iter().enumerate() {
            let gather = gather.clone();
            let on_fulfill = producer.clone();
            let on_reject = producer.clone();
            promise.then(
                &ctx,
                move |value| {
                    let mut gather = gather.lock();
                    if gather.values[index].replace(value).is_none() {
                        gather.remaining -= 1;
                    }
                    if gather.remaining > 0 {
                        return;
                    }
                    let values = gather.values.drain(..).flatten().collect();
                    drop(gather);
                    on_fulfill.fulfill(values);
                },
                move |err| {
                    on_reject.reject(err);
                },
            );
        }
    })
}

/// Settles with whichever input settles first, fulfilled or rejected.
///
/// Returns [`EmptyRace`] when there is nothing to race.
pub fn try_race<T, E>(
    promises: impl IntoIterator<Item = Promise<T, E>>,
) -> Result<Promise<T, E>, EmptyRace>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let promises: Vec<_> = promises.into_iter().collect();
    if promises.is_empty() {
        return Err(EmptyRace);
    }
    let ctx = Context::inline();
    Ok(Promise::new(|producer| {
        for promise in &promises {
            let on_fulfill = producer.clone();
            let on_reject = producer.clone();
            promise.then(
                &ctx,
                move |value| {
                    on_fulfill.fulfill(value);
                },
                move |err| {
                    on_reject.reject(err);
                },
            );
        }
    }))
}

/// Settles with whichever input settles first, fulfilled or rejected.
///
/// # Panics
///
/// Panics if `promises` is empty. Racing nothing is a caller bug, not a
/// rejection; use [`try_race`] to handle it as a value instead.
pub fn race<T, E>(promises: impl IntoIterator<Item = Promise<T, E>>) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    try_race(promises).unwrap_or_else(|misuse| {
        tracing::error!(%misuse, "race called without promises");
        panic!("{misuse}")
    })
}

fn both_ready<A: Clone, B: Clone>(pair: &(Option<A>, Option<B>)) -> Option<(A, B)> {
    match pair {
        (Some(a), Some(b)) => Some((a.clone(), b.clone())),
        _ => None,
    }
}

/// Pairs two promises. Fulfills once both have, rejects with whichever side
/// rejects first.
///
/// Only the values are kept, never the input handles, so dropping both
/// inputs unsettled frees them.
pub fn zip<A, B, E>(first: &Promise<A, E>, second: &Promise<B, E>) -> Promise<(A, B), E>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let ctx = Context::inline();
    let pair = Arc::new(Mutex::new((None::<A>, None::<B>)));
    Promise::new(|producer| {
        let (left, on_left) = (pair.clone(), producer.clone());
        let (right, on_right) = (pair, producer.clone());
        let reject_first = producer.clone();
        first.then(
            &ctx,
            move |a| {
                let both = {
                    let mut pair = left.lock();
                    pair.0 = Some(a);
                    both_ready(&pair)
                };
                if let Some(both) = both {
                    on_left.fulfill(both);
                }
            },
            move |err| {
                reject_first.reject(err);
            },
        );
        second.then(
            &ctx,
            move |b| {
                let both = {
                    let mut pair = right.lock();
                    pair.1 = Some(b);
                    both_ready(&pair)
                };
                if let Some(both) = both {
                    on_right.fulfill(both);
                }
            },
            move |err| {
                producer.reject(err);
            },
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Producer, State};
    use rstest::rstest;

    fn pending<T: Clone + Send + 'static>(n: usize) -> (Vec<Producer<T>>, Vec<Promise<T>>) {
        (0..n).map(|_| Promise::pending()).unzip()
    }

    #[test]
    fn test_all_empty_fulfills_immediately() {
        let joined = all(Vec::<Promise<i32>>::new());
        assert_eq!(joined.value(), Some(vec![]));
    }

    #[rstest]
    #[case(vec![0, 1, 2])]
    #[case(vec![2, 1, 0])]
    #[case(vec![1, 2, 0])]
    fn test_all_keeps_input_order(#[case] completion: Vec<usize>) {
        let (producers, promises) = pending::<usize>(3);
        let joined = all(promises);
        for (step, index) in completion.iter().enumerate() {
            assert!(joined.is_pending(), "settled early at step {step}");
            producers[*index].fulfill(index * 10);
        }
        assert_eq!(joined.value(), Some(vec![0, 10, 20]));
    }

    #[test]
    fn test_all_first_rejection_wins() {
        let (producers, promises) = pending::<i32>(3);
        let joined = all(promises);
        producers[0].fulfill(1);
        producers[2].reject(Error::msg("third"));
        producers[1].reject(Error::msg("second"));
        assert_eq!(joined.error().unwrap().to_string(), "third");
    }

    #[test]
    fn test_all_with_settled_inputs() {
        let joined = all(vec![Promise::<i32>::fulfilled(4), Promise::fulfilled(5)]);
        assert_eq!(joined.value(), Some(vec![4, 5]));
    }

    #[test]
    fn test_try_race_empty_is_misuse() {
        assert_eq!(try_race(Vec::<Promise<i32>>::new()).unwrap_err(), EmptyRace);
    }

    #[test]
    #[should_panic(expected = "race requires at least one promise")]
    fn test_race_empty_panics() {
        race(Vec::<Promise<i32>>::new());
    }

    #[test]
    fn test_race_first_settlement_wins_either_way() {
        let (producers, promises) = pending::<i32>(2);
        let raced = race(promises);
        producers[1].reject(Error::msg("fast failure"));
        producers[0].fulfill(1);
        assert_eq!(raced.error().unwrap().to_string(), "fast failure");
    }

    #[test]
    fn test_zip_waits_for_both_sides() {
        let (left, first) = Promise::<i32>::pending();
        let (right, second) = Promise::<&'static str>::pending();
        let zipped = zip(&first, &second);
        right.fulfill("b");
        assert!(zipped.is_pending());
        left.fulfill(1);
        assert!(matches!(zipped.state(), State::Fulfilled((1, "b"))));
    }

    #[test]
    fn test_zip_rejects_with_first_failure() {
        let (left, first) = Promise::<i32>::pending();
        let (right, second) = Promise::<i32>::pending();
        let zipped = zip(&first, &second);
        right.reject(Error::msg("right"));
        left.reject(Error::msg("left"));
        assert_eq!(zipped.error().unwrap().to_string(), "right");
    }
}

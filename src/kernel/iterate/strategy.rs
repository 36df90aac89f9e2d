//! Per-element effects, one per (kind, shape) pair
//!
//! A strategy decides what happens to element `i`. It never decides when the
//! next element runs: no control flow, no deferral, no task state. The only
//! thing it writes is the aggregate it is handed.

use super::collection::{Aggregate, Collection, Key, Shape};
use std::rc::Rc;

/// Each: called for its side effect, return value ignored
pub type EachFn<V, C> = Box<dyn FnMut(&C, &V, Key<'_>, &Collection<V>)>;

/// Map: return value stored at the element's index or key
pub type MapFn<V, R, C> = Box<dyn FnMut(&C, &V, Key<'_>, &Collection<V>) -> R>;

/// Reduce: takes the accumulator so far, returns the next one
pub type ReduceFn<V, R, C> = Box<dyn FnMut(&C, R, &V, Key<'_>, &Collection<V>) -> R>;

/// Effect for cursor position `i`
pub type Effect<R> = Box<dyn FnMut(usize, &mut Aggregate<R>)>;

/// Aggregate kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationKind {
    Each,
    Map,
    Reduce,
}

impl std::fmt::Display for IterationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationKind::Each => write!(f, "each"),
            IterationKind::Map => write!(f, "map"),
            IterationKind::Reduce => write!(f, "reduce"),
        }
    }
}

/// Element function tagged with its aggregate kind
pub enum Operation<V, R, C> {
    Each(EachFn<V, C>),
    Map(MapFn<V, R, C>),
    Reduce(ReduceFn<V, R, C>),
}

impl<V, R, C> Operation<V, R, C> {
    pub fn kind(&self) -> IterationKind {
        match self {
            Operation::Each(_) => IterationKind::Each,
            Operation::Map(_) => IterationKind::Map,
            Operation::Reduce(_) => IterationKind::Reduce,
        }
    }
}

/// What a strategy captures from its task
pub(crate) struct Source<V, C> {
    pub list: Rc<Collection<V>>,
    /// Materialized key order (empty for sequences)
    pub keys: Rc<[String]>,
    /// Call context for the element function
    pub context: Rc<C>,
}

/// Pick the effect for an operation over a collection of the given shape
pub(crate) fn select<V, R, C>(
    operation: Operation<V, R, C>,
    shape: Shape,
    source: Source<V, C>,
) -> Effect<R>
where
    V: 'static,
    R: Clone + 'static,
    C: 'static,
{
    match (operation, shape) {
        (Operation::Each(f), Shape::Sequence) => each_sequence(f, source),
        (Operation::Each(f), Shape::Keyed) => each_keyed(f, source),
        (Operation::Map(f), Shape::Sequence) => map_sequence(f, source),
        (Operation::Map(f), Shape::Keyed) => map_keyed(f, source),
        (Operation::Reduce(f), Shape::Sequence) => reduce_sequence(f, source),
        (Operation::Reduce(f), Shape::Keyed) => reduce_keyed(f, source),
    }
}

fn each_sequence<V: 'static, R: 'static, C: 'static>(
    mut f: EachFn<V, C>,
    src: Source<V, C>,
) -> Effect<R> {
    Box::new(move |i, _| {
        if let Some(value) = src.list.at(i) {
            f(&src.context, value, Key::Index(i), &src.list);
        }
    })
}

fn each_keyed<V: 'static, R: 'static, C: 'static>(
    mut f: EachFn<V, C>,
    src: Source<V, C>,
) -> Effect<R> {
    Box::new(move |i, _| {
        let Some(key) = src.keys.get(i) else {
            return;
        };
        if let Some(value) = src.list.get(key) {
            f(&src.context, value, Key::Name(key), &src.list);
        }
    })
}

fn map_sequence<V: 'static, R: 'static, C: 'static>(
    mut f: MapFn<V, R, C>,
    src: Source<V, C>,
) -> Effect<R> {
    Box::new(move |i, result| {
        let Some(value) = src.list.at(i) else {
            return;
        };
        let mapped = f(&src.context, value, Key::Index(i), &src.list);
        if let Aggregate::Sequence(slots) = result
            && let Some(slot) = slots.get_mut(i)
        {
            *slot = Some(mapped);
        }
    })
}

fn map_keyed<V: 'static, R: 'static, C: 'static>(
    mut f: MapFn<V, R, C>,
    src: Source<V, C>,
) -> Effect<R> {
    Box::new(move |i, result| {
        let Some(key) = src.keys.get(i) else {
            return;
        };
        let Some(value) = src.list.get(key) else {
            return;
        };
        let mapped = f(&src.context, value, Key::Name(key), &src.list);
        if let Aggregate::Keyed(map) = result {
            map.insert(key.clone(), mapped);
        }
    })
}

fn reduce_sequence<V: 'static, R: Clone + 'static, C: 'static>(
    mut f: ReduceFn<V, R, C>,
    src: Source<V, C>,
) -> Effect<R> {
    Box::new(move |i, result| {
        let Some(value) = src.list.at(i) else {
            return;
        };
        accumulate(result, |acc| f(&src.context, acc, value, Key::Index(i), &src.list));
    })
}

fn reduce_keyed<V: 'static, R: Clone + 'static, C: 'static>(
    mut f: ReduceFn<V, R, C>,
    src: Source<V, C>,
) -> Effect<R> {
    Box::new(move |i, result| {
        let Some(key) = src.keys.get(i) else {
            return;
        };
        let Some(value) = src.list.get(key) else {
            return;
        };
        accumulate(result, |acc| f(&src.context, acc, value, Key::Name(key), &src.list));
    })
}

/// Replace the accumulator with `f(accumulator)`
///
/// `f` works on a copy, so if it panics the aggregate still holds the
/// accumulator from before the failing element.
fn accumulate<R: Clone>(result: &mut Aggregate<R>, f: impl FnOnce(R) -> R) {
    if let Aggregate::Value(acc) = result {
        *acc = f(acc.clone());
    }
}

//! Collections an iteration walks, and the aggregates it produces

use indexmap::IndexMap;

/// Collection shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Contiguous, index-addressed
    Sequence,
    /// String-keyed, iterated in insertion order
    Keyed,
}

/// Source collection of an iteration
///
/// Tasks hold it behind an `Rc`, so the elements cannot change while a run is
/// suspended between turns. Interior mutability inside `V` is the caller's
/// business.
#[derive(Debug, Clone, PartialEq)]
pub enum Collection<V> {
    Sequence(Vec<V>),
    Keyed(IndexMap<String, V>),
}

impl<V> Collection<V> {
    /// Build a keyed collection, keeping the order pairs arrive in
    pub fn keyed<K: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Collection::Keyed(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn shape(&self) -> Shape {
        match self {
            Collection::Sequence(_) => Shape::Sequence,
            Collection::Keyed(_) => Shape::Keyed,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Collection::Sequence(items) => items.len(),
            Collection::Keyed(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at a sequence index (None for keyed collections)
    pub fn at(&self, index: usize) -> Option<&V> {
        match self {
            Collection::Sequence(items) => items.get(index),
            Collection::Keyed(_) => None,
        }
    }

    /// Element under a key (None for sequences)
    pub fn get(&self, key: &str) -> Option<&V> {
        match self {
            Collection::Sequence(_) => None,
            Collection::Keyed(map) => map.get(key),
        }
    }

    /// Keys in iteration order (empty for sequences)
    pub fn keys(&self) -> Vec<String> {
        match self {
            Collection::Sequence(_) => Vec::new(),
            Collection::Keyed(map) => map.keys().cloned().collect(),
        }
    }
}

impl<V> From<Vec<V>> for Collection<V> {
    fn from(items: Vec<V>) -> Self {
        Collection::Sequence(items)
    }
}

impl<V> From<IndexMap<String, V>> for Collection<V> {
    fn from(map: IndexMap<String, V>) -> Self {
        Collection::Keyed(map)
    }
}

/// Position of the element handed to an element function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    Index(usize),
    Name(&'a str),
}

impl Key<'_> {
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(i) => Some(*i),
            Key::Name(_) => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Key::Index(_) => None,
            Key::Name(name) => Some(*name),
        }
    }
}

impl std::fmt::Display for Key<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{}", i),
            Key::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Aggregate output of an iteration run
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate<R> {
    /// Each runs, and Map runs before they start
    Nothing,
    /// Map over a sequence; slots fill as elements are processed
    Sequence(Vec<Option<R>>),
    /// Map over a keyed collection; entries appear as elements are processed
    Keyed(IndexMap<String, R>),
    /// Reduce accumulator
    Value(R),
}

impl<R> Aggregate<R> {
    /// Empty Map container matching the input shape
    pub(crate) fn seed(shape: Shape, len: usize) -> Self {
        match shape {
            Shape::Sequence => {
                Aggregate::Sequence(std::iter::repeat_with(|| None).take(len).collect())
            }
            Shape::Keyed => Aggregate::Keyed(IndexMap::with_capacity(len)),
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Aggregate::Nothing)
    }

    pub fn as_sequence(&self) -> Option<&[Option<R>]> {
        match self {
            Aggregate::Sequence(slots) => Some(slots.as_slice()),
            _ => None,
        }
    }

    /// Mapped sequence, if every slot has been filled
    pub fn into_vec(self) -> Option<Vec<R>> {
        match self {
            Aggregate::Sequence(slots) => slots.into_iter().collect(),
            _ => None,
        }
    }

    pub fn as_keyed(&self) -> Option<&IndexMap<String, R>> {
        match self {
            Aggregate::Keyed(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_keyed(self) -> Option<IndexMap<String, R>> {
        match self {
            Aggregate::Keyed(map) => Some(map),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&R> {
        match self {
            Aggregate::Value(acc) => Some(acc),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<R> {
        match self {
            Aggregate::Value(acc) => Some(acc),
            _ => None,
        }
    }
}

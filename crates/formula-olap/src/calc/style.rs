use crate::model::Tuple;
use std::fmt;
use std::sync::Arc;

/// Representations a set-valued node can hand to its consumer, cheapest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultStyle {
    /// A single-pass lazy sequence.
    Iterable,
    /// A materialized, shared, read-only list.
    List,
    /// A freshly built list the consumer may append to or reorder.
    MutableList,
    /// A non-set value.
    Value,
}

impl ResultStyle {
    /// Everything a node that builds a fresh `Vec` can produce.
    pub const ANY_SET: &'static [ResultStyle] = &[
        ResultStyle::Iterable,
        ResultStyle::List,
        ResultStyle::MutableList,
    ];
    /// Nodes that hand out a shared list they must not let consumers mutate.
    pub const SHARED_LIST: &'static [ResultStyle] = &[ResultStyle::Iterable, ResultStyle::List];
    /// Nodes that only materialize.
    pub const MATERIALIZED: &'static [ResultStyle] = &[ResultStyle::List, ResultStyle::MutableList];

    /// Preference of a one-pass consumer.
    pub const ITERATE: &'static [ResultStyle] = &[ResultStyle::Iterable, ResultStyle::List];
    /// Preference of a consumer that needs random access.
    pub const RANDOM_ACCESS: &'static [ResultStyle] =
        &[ResultStyle::List, ResultStyle::MutableList, ResultStyle::Iterable];
    /// Preference of a consumer that reorders or appends, falling back to copying.
    pub const MUTATE: &'static [ResultStyle] =
        &[ResultStyle::MutableList, ResultStyle::List, ResultStyle::Iterable];

    /// Picks the first style in `accepts` (the caller's preference order) that `produces`
    /// contains.
    pub fn negotiate(produces: &[ResultStyle], accepts: &[ResultStyle]) -> Option<ResultStyle> {
        accepts.iter().copied().find(|style| produces.contains(style))
    }
}

pub type TupleIter = Box<dyn Iterator<Item = Tuple> + Send>;

/// A set value in one of the negotiated representations.
pub enum TupleSet {
    Iterable(TupleIter),
    List(Arc<[Tuple]>),
    MutableList(Vec<Tuple>),
}

impl TupleSet {
    pub fn empty() -> Self {
        TupleSet::MutableList(Vec::new())
    }

    pub fn style(&self) -> ResultStyle {
        match self {
            TupleSet::Iterable(_) => ResultStyle::Iterable,
            TupleSet::List(_) => ResultStyle::List,
            TupleSet::MutableList(_) => ResultStyle::MutableList,
        }
    }

    /// Known length without consuming a lazy sequence.
    pub fn len_hint(&self) -> Option<usize> {
        match self {
            TupleSet::Iterable(iter) => match iter.size_hint() {
                (lo, Some(hi)) if lo == hi => Some(lo),
                _ => None,
            },
            TupleSet::List(list) => Some(list.len()),
            TupleSet::MutableList(list) => Some(list.len()),
        }
    }

    /// Materializes a lazy sequence exactly once; lists are returned as-is.
    pub fn into_list(self) -> Arc<[Tuple]> {
        match self {
            TupleSet::Iterable(iter) => iter.collect(),
            TupleSet::List(list) => list,
            TupleSet::MutableList(list) => list.into(),
        }
    }

    /// A list the caller owns. Shared lists are copied.
    pub fn into_mutable(self) -> Vec<Tuple> {
        match self {
            TupleSet::Iterable(iter) => iter.collect(),
            TupleSet::List(list) => list.to_vec(),
            TupleSet::MutableList(list) => list,
        }
    }

    pub fn into_iter_tuples(self) -> TupleIter {
        match self {
            TupleSet::Iterable(iter) => iter,
            TupleSet::List(list) => Box::new(SharedListIter { list, next: 0 }),
            TupleSet::MutableList(list) => Box::new(list.into_iter()),
        }
    }

    /// Converts to `style`, materializing at most once.
    pub fn adapt(self, style: ResultStyle) -> TupleSet {
        match (style, self) {
            (ResultStyle::List, TupleSet::Iterable(iter)) => TupleSet::List(iter.collect()),
            (ResultStyle::MutableList, set @ (TupleSet::Iterable(_) | TupleSet::List(_))) => {
                TupleSet::MutableList(set.into_mutable())
            }
            (_, set) => set,
        }
    }
}

impl fmt::Debug for TupleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TupleSet::Iterable(_) => f.write_str("TupleSet::Iterable(..)"),
            TupleSet::List(list) => f.debug_tuple("TupleSet::List").field(list).finish(),
            TupleSet::MutableList(list) => {
                f.debug_tuple("TupleSet::MutableList").field(list).finish()
            }
        }
    }
}

/// Iterates a shared list by index so the iterator owns its data.
struct SharedListIter {
    list: Arc<[Tuple]>,
    next: usize,
}

impl Iterator for SharedListIter {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        let tuple = self.list.get(self.next)?.clone();
        self.next += 1;
        Some(tuple)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.list.len() - self.next;
        (remaining, Some(remaining))
    }
}

//! The materialization engine (spec.md §4.3 `Data`): `save`/`remove`/`clear`
//! over a nested mapping, with an optional sorted-set leaf and an optional
//! precondition. Grounded line-for-line on
//! `examples/original_source/handler/data.go`, but reimplemented without
//! reflection: spec.md's own Design Notes §9 ask for "code generation from
//! the declared schema producing typed save/remove/clear per binding" over
//! the source's `reflect.Value` walk, and SPEC_FULL §3 resolves the
//! resulting Open Question (unbounded `MapKeys []string`) by capping key-path
//! depth at 2 — the full range exercised by every scenario in spec.md §8.
//!
//! Every binding operates against a caller-owned `Views` struct (a plain
//! Rust struct holding one field per materialized mapping) under a single
//! `Arc<RwLock<Views>>` owned by the table handler — the direct expression
//! of spec.md §9's "Shared mutex across bindings" note: one lock, shared by
//! construction, not by convention.
//!
//! Value-by-identity (spec.md §3 "optionally wrapped to refer to the row by
//! identity rather than by value-copy", the source's `realValueIsPointer`)
//! is expressed by choosing `V = Arc<Row>` and a `value_fn` that clones the
//! `Arc` instead of the row; the table handler always decodes one `Arc<Row>`
//! per event so that clone is a refcount bump, not a copy.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// One materialization rule, fanned out to by a table handler for every
/// `save`/`remove`/`clear` (spec.md §4.2, §4.3). `Views` is the caller's
/// plain struct of target mappings; `Row` is the decoded row type.
pub trait Binding<Row, Views>: Send + Sync {
    fn save(&self, views: &mut Views, row: &Arc<Row>);
    fn remove(&self, views: &mut Views, row: &Arc<Row>);
    fn clear(&self, views: &mut Views);
}

type Precondition<Row> = Box<dyn Fn(&Arc<Row>) -> bool + Send + Sync>;
type Accessor<Views, M> = Box<dyn Fn(&mut Views) -> &mut M + Send + Sync>;

/// Depth-1 binding: `K -> V`, no sorted set. Covers spec.md §8 S1's
/// `studentsMap: id -> Student`.
pub struct Single<Row, Views, K, V> {
    accessor: Accessor<Views, HashMap<K, V>>,
    key_fn: Box<dyn Fn(&Arc<Row>) -> K + Send + Sync>,
    value_fn: Box<dyn Fn(&Arc<Row>) -> V + Send + Sync>,
    precondition: Option<Precondition<Row>>,
}

impl<Row, Views, K, V> Single<Row, Views, K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(
        accessor: impl Fn(&mut Views) -> &mut HashMap<K, V> + Send + Sync + 'static,
        key_fn: impl Fn(&Arc<Row>) -> K + Send + Sync + 'static,
        value_fn: impl Fn(&Arc<Row>) -> V + Send + Sync + 'static,
    ) -> Self {
        Single {
            accessor: Box::new(accessor),
            key_fn: Box::new(key_fn),
            value_fn: Box::new(value_fn),
            precondition: None,
        }
    }

    /// Ignores events where the row fails `pred` (spec.md §4.3 step 1, §8 S4).
    pub fn precondition(mut self, pred: impl Fn(&Arc<Row>) -> bool + Send + Sync + 'static) -> Self {
        self.precondition = Some(Box::new(pred));
        self
    }
}

impl<Row, Views, K, V> Binding<Row, Views> for Single<Row, Views, K, V>
where
    Row: Send + Sync,
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
{
    fn save(&self, views: &mut Views, row: &Arc<Row>) {
        if let Some(p) = &self.precondition {
            if !p(row) {
                return;
            }
        }
        let key = (self.key_fn)(row);
        let value = (self.value_fn)(row);
        (self.accessor)(views).insert(key, value);
    }

    fn remove(&self, views: &mut Views, row: &Arc<Row>) {
        if let Some(p) = &self.precondition {
            if !p(row) {
                return;
            }
        }
        let key = (self.key_fn)(row);
        (self.accessor)(views).remove(&key);
    }

    fn clear(&self, views: &mut Views) {
        (self.accessor)(views).clear();
    }
}

/// Depth-2 binding: `K1 -> K2 -> V`, no sorted set. Intermediate `K1`
/// entries are created on demand and pruned when empty (spec.md I3).
pub struct Nested<Row, Views, K1, K2, V> {
    accessor: Accessor<Views, HashMap<K1, HashMap<K2, V>>>,
    key1_fn: Box<dyn Fn(&Arc<Row>) -> K1 + Send + Sync>,
    key2_fn: Box<dyn Fn(&Arc<Row>) -> K2 + Send + Sync>,
    value_fn: Box<dyn Fn(&Arc<Row>) -> V + Send + Sync>,
    precondition: Option<Precondition<Row>>,
}

impl<Row, Views, K1, K2, V> Nested<Row, Views, K1, K2, V>
where
    K1: Eq + Hash + Send + Sync + 'static,
    K2: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(
        accessor: impl Fn(&mut Views) -> &mut HashMap<K1, HashMap<K2, V>> + Send + Sync + 'static,
        key1_fn: impl Fn(&Arc<Row>) -> K1 + Send + Sync + 'static,
        key2_fn: impl Fn(&Arc<Row>) -> K2 + Send + Sync + 'static,
        value_fn: impl Fn(&Arc<Row>) -> V + Send + Sync + 'static,
    ) -> Self {
        Nested {
            accessor: Box::new(accessor),
            key1_fn: Box::new(key1_fn),
            key2_fn: Box::new(key2_fn),
            value_fn: Box::new(value_fn),
            precondition: None,
        }
    }

    pub fn precondition(mut self, pred: impl Fn(&Arc<Row>) -> bool + Send + Sync + 'static) -> Self {
        self.precondition = Some(Box::new(pred));
        self
    }
}

impl<Row, Views, K1, K2, V> Binding<Row, Views> for Nested<Row, Views, K1, K2, V>
where
    Row: Send + Sync,
    K1: Eq + Hash + Send + Sync,
    K2: Eq + Hash + Send + Sync,
    V: Send + Sync,
{
    fn save(&self, views: &mut Views, row: &Arc<Row>) {
        if let Some(p) = &self.precondition {
            if !p(row) {
                return;
            }
        }
        let k1 = (self.key1_fn)(row);
        let k2 = (self.key2_fn)(row);
        let value = (self.value_fn)(row);
        (self.accessor)(views).entry(k1).or_default().insert(k2, value);
    }

    fn remove(&self, views: &mut Views, row: &Arc<Row>) {
        if let Some(p) = &self.precondition {
            if !p(row) {
                return;
            }
        }
        let k1 = (self.key1_fn)(row);
        let k2 = (self.key2_fn)(row);
        let top = (self.accessor)(views);
        if let Some(inner) = top.get_mut(&k1) {
            inner.remove(&k2);
            if inner.is_empty() {
                top.remove(&k1);
            }
        }
    }

    fn clear(&self, views: &mut Views) {
        (self.accessor)(views).clear();
    }
}

/// Orders and uniquifies elements of a sorted-set leaf by a tuple `U`
/// (spec.md §4.3 "Sorted-set operations"). Scalar sorted sets (no
/// uniqueness key) use the element itself as `U`.
pub trait UniqueKey<V> {
    type Key: Ord + Clone;
    fn key(&self, value: &V) -> Self::Key;
}

impl<V, F, U> UniqueKey<V> for F
where
    F: Fn(&V) -> U,
    U: Ord + Clone,
{
    type Key = U;
    fn key(&self, value: &V) -> U {
        (self)(value)
    }
}

/// Binary-search insert (spec.md §4.3 "Insert"): replaces in place on a
/// matching uniqueness tuple, else inserts at the sorted position.
fn sorted_insert<V, U: Ord>(items: &mut Vec<V>, value: V, key_of: impl Fn(&V) -> U) {
    let k = key_of(&value);
    match items.binary_search_by(|existing| key_of(existing).cmp(&k)) {
        Ok(idx) => items[idx] = value,
        Err(idx) => items.insert(idx, value),
    }
}

/// Binary-search remove (spec.md §4.3 "Remove"): no-op if the tuple isn't
/// present.
fn sorted_remove<V, U: Ord>(items: &mut Vec<V>, key: &U, key_of: impl Fn(&V) -> U) {
    if let Ok(idx) = items.binary_search_by(|existing| key_of(existing).cmp(key)) {
        items.remove(idx);
    }
}

/// Depth-1 sorted-set binding: `K -> Vec<V>` ordered by `uniqueness_fn`
/// (spec.md §8 S2's `classesMap: class -> sorted set by id of Student`).
pub struct SingleSorted<Row, Views, K, V, U> {
    accessor: Accessor<Views, HashMap<K, Vec<V>>>,
    key_fn: Box<dyn Fn(&Arc<Row>) -> K + Send + Sync>,
    value_fn: Box<dyn Fn(&Arc<Row>) -> V + Send + Sync>,
    unique_fn: Box<dyn Fn(&V) -> U + Send + Sync>,
    precondition: Option<Precondition<Row>>,
}

impl<Row, Views, K, V, U> SingleSorted<Row, Views, K, V, U>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    U: Ord + Send + Sync + 'static,
{
    pub fn new(
        accessor: impl Fn(&mut Views) -> &mut HashMap<K, Vec<V>> + Send + Sync + 'static,
        key_fn: impl Fn(&Arc<Row>) -> K + Send + Sync + 'static,
        value_fn: impl Fn(&Arc<Row>) -> V + Send + Sync + 'static,
        unique_fn: impl Fn(&V) -> U + Send + Sync + 'static,
    ) -> Self {
        SingleSorted {
            accessor: Box::new(accessor),
            key_fn: Box::new(key_fn),
            value_fn: Box::new(value_fn),
            unique_fn: Box::new(unique_fn),
            precondition: None,
        }
    }

    pub fn precondition(mut self, pred: impl Fn(&Arc<Row>) -> bool + Send + Sync + 'static) -> Self {
        self.precondition = Some(Box::new(pred));
        self
    }
}

impl<Row, Views, K, V, U> Binding<Row, Views> for SingleSorted<Row, Views, K, V, U>
where
    Row: Send + Sync,
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
    U: Ord + Send + Sync,
{
    fn save(&self, views: &mut Views, row: &Arc<Row>) {
        if let Some(p) = &self.precondition {
            if !p(row) {
                return;
            }
        }
        let key = (self.key_fn)(row);
        let value = (self.value_fn)(row);
        let leaf = (self.accessor)(views).entry(key).or_insert_with(Vec::new);
        sorted_insert(leaf, value, |v| (self.unique_fn)(v));
    }

    fn remove(&self, views: &mut Views, row: &Arc<Row>) {
        if let Some(p) = &self.precondition {
            if !p(row) {
                return;
            }
        }
        let key = (self.key_fn)(row);
        let value = (self.value_fn)(row);
        let u = (self.unique_fn)(&value);
        let top = (self.accessor)(views);
        if let Some(leaf) = top.get_mut(&key) {
            sorted_remove(leaf, &u, |v| (self.unique_fn)(v));
            if leaf.is_empty() {
                top.remove(&key);
            }
        }
    }

    fn clear(&self, views: &mut Views) {
        (self.accessor)(views).clear();
    }
}

/// Depth-2 sorted-set binding: `K1 -> K2 -> Vec<V>` ordered by
/// `uniqueness_fn`. Not exercised by any concrete spec.md scenario but kept
/// for symmetry with [`Nested`] at the same depth cap.
pub struct NestedSorted<Row, Views, K1, K2, V, U> {
    accessor: Accessor<Views, HashMap<K1, HashMap<K2, Vec<V>>>>,
    key1_fn: Box<dyn Fn(&Arc<Row>) -> K1 + Send + Sync>,
    key2_fn: Box<dyn Fn(&Arc<Row>) -> K2 + Send + Sync>,
    value_fn: Box<dyn Fn(&Arc<Row>) -> V + Send + Sync>,
    unique_fn: Box<dyn Fn(&V) -> U + Send + Sync>,
    precondition: Option<Precondition<Row>>,
}

impl<Row, Views, K1, K2, V, U> NestedSorted<Row, Views, K1, K2, V, U>
where
    K1: Eq + Hash + Send + Sync + 'static,
    K2: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
    U: Ord + Send + Sync + 'static,
{
    pub fn new(
        accessor: impl Fn(&mut Views) -> &mut HashMap<K1, HashMap<K2, Vec<V>>> + Send + Sync + 'static,
        key1_fn: impl Fn(&Arc<Row>) -> K1 + Send + Sync + 'static,
        key2_fn: impl Fn(&Arc<Row>) -> K2 + Send + Sync + 'static,
        value_fn: impl Fn(&Arc<Row>) -> V + Send + Sync + 'static,
        unique_fn: impl Fn(&V) -> U + Send + Sync + 'static,
    ) -> Self {
        NestedSorted {
            accessor: Box::new(accessor),
            key1_fn: Box::new(key1_fn),
            key2_fn: Box::new(key2_fn),
            value_fn: Box::new(value_fn),
            unique_fn: Box::new(unique_fn),
            precondition: None,
        }
    }

    pub fn precondition(mut self, pred: impl Fn(&Arc<Row>) -> bool + Send + Sync + 'static) -> Self {
        self.precondition = Some(Box::new(pred));
        self
    }
}

impl<Row, Views, K1, K2, V, U> Binding<Row, Views> for NestedSorted<Row, Views, K1, K2, V, U>
where
    Row: Send + Sync,
    K1: Eq + Hash + Send + Sync,
    K2: Eq + Hash + Send + Sync,
    V: Send + Sync,
    U: Ord + Send + Sync,
{
    fn save(&self, views: &mut Views, row: &Arc<Row>) {
        if let Some(p) = &self.precondition {
            if !p(row) {
                return;
            }
        }
        let k1 = (self.key1_fn)(row);
        let k2 = (self.key2_fn)(row);
        let value = (self.value_fn)(row);
        let leaf = (self.accessor)(views)
            .entry(k1)
            .or_default()
            .entry(k2)
            .or_insert_with(Vec::new);
        sorted_insert(leaf, value, |v| (self.unique_fn)(v));
    }

    fn remove(&self, views: &mut Views, row: &Arc<Row>) {
        if let Some(p) = &self.precondition {
            if !p(row) {
                return;
            }
        }
        let k1 = (self.key1_fn)(row);
        let k2 = (self.key2_fn)(row);
        let value = (self.value_fn)(row);
        let u = (self.unique_fn)(&value);
        let top = (self.accessor)(views);
        if let Some(inner) = top.get_mut(&k1) {
            if let Some(leaf) = inner.get_mut(&k2) {
                sorted_remove(leaf, &u, |v| (self.unique_fn)(v));
                if leaf.is_empty() {
                    inner.remove(&k2);
                }
            }
            if inner.is_empty() {
                top.remove(&k1);
            }
        }
    }

    fn clear(&self, views: &mut Views) {
        (self.accessor)(views).clear();
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! A type-erased, name-addressable array store, one per entity class
//! (vertex/halfedge/edge/face), grounded in PMP's
//! `BasePropertyArray`/`PropertyArray<T>` split: a trait object owns the
//! untyped lifecycle operations (`resize`, `swap`, `push_back`) while a
//! typed handle hands back the concrete `Vec<T>`.

use std::any::Any;

trait AnyPropertyArray: Any {
    fn resize(&mut self, n: usize);
    fn push_back(&mut self);
    fn swap(&mut self, i: usize, j: usize);
    fn clone_box(&self) -> Box<dyn AnyPropertyArray>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Rebuilds the array by gathering `order[k]`'s old entry into new
    /// position `k`, used by garbage collection to compact every
    /// registered property (built-in and caller-added alike) in lockstep
    /// without needing to know each array's element type.
    fn reorder(&mut self, order: &[usize]);
    /// Copies `other`'s entry `src` into `self`'s entry `dst`, used by
    /// `join_mesh` to concatenate same-named properties. Returns `false`
    /// without copying if `other`'s concrete element type doesn't match
    /// `self`'s (§4.4.4: "non-matching properties are dropped").
    fn copy_from(&mut self, other: &dyn AnyPropertyArray, src: usize, dst: usize) -> bool;
}

struct PropertyArray<T> {
    data: Vec<T>,
    default: T,
}

impl<T: Clone + 'static> AnyPropertyArray for PropertyArray<T> {
    fn resize(&mut self, n: usize) {
        self.data.resize(n, self.default.clone());
    }

    fn push_back(&mut self) {
        self.data.push(self.default.clone());
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.data.swap(i, j);
    }

    fn clone_box(&self) -> Box<dyn AnyPropertyArray> {
        Box::new(PropertyArray {
            data: self.data.clone(),
            default: self.default.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn reorder(&mut self, order: &[usize]) {
        self.data = order.iter().map(|&i| self.data[i].clone()).collect();
    }

    fn copy_from(&mut self, other: &dyn AnyPropertyArray, src: usize, dst: usize) -> bool {
        match other.as_any().downcast_ref::<PropertyArray<T>>() {
            Some(other) => {
                self.data[dst] = other.data[src].clone();
                true
            }
            None => false,
        }
    }
}

/// A named, typed handle into a `PropertyStore`. Holds no data itself; all
/// reads/writes go back through the store that issued it. An invalid handle
/// (§4.4.3: "adding a property with an existing name returns an invalid
/// handle, not an error") carries no name and panics if dereferenced.
pub struct PropertyHandle<T> {
    name: Option<&'static str>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> PropertyHandle<T> {
    pub const fn invalid() -> Self {
        Self {
            name: None,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.name.is_some()
    }
}

impl<T> Default for PropertyHandle<T> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<T> Clone for PropertyHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for PropertyHandle<T> {}

/// Every array in a store shares one length, kept in lockstep by
/// `push_back`/`resize`/`swap` so any handle indexes validly into any other.
pub struct PropertyStore {
    len: usize,
    arrays: Vec<(&'static str, Box<dyn AnyPropertyArray>)>,
}

impl Clone for PropertyStore {
    fn clone(&self) -> Self {
        Self {
            len: self.len,
            arrays: self
                .arrays
                .iter()
                .map(|(n, a)| (*n, a.clone_box()))
                .collect(),
        }
    }
}

impl PropertyStore {
    pub fn new() -> Self {
        Self {
            len: 0,
            arrays: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds a new named array and returns a valid handle to it, or — if
    /// `name` is already registered, under any type — returns an invalid
    /// handle without touching the existing array (§4.4.3).
    pub fn add<T: Clone + 'static>(&mut self, name: &'static str, default: T) -> PropertyHandle<T> {
        if self.arrays.iter().any(|(n, _)| *n == name) {
            return PropertyHandle::invalid();
        }
        let mut array = PropertyArray {
            data: Vec::with_capacity(self.len),
            default,
        };
        array.resize(self.len);
        self.arrays.push((name, Box::new(array)));
        PropertyHandle {
            name: Some(name),
            _marker: std::marker::PhantomData,
        }
    }

    /// Drops the named array entirely, if present.
    pub fn remove(&mut self, name: &str) {
        self.arrays.retain(|(n, _)| *n != name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.arrays.iter().any(|(n, _)| *n == name)
    }

    /// Recovers a previously-issued handle by name, for callers that know a
    /// property exists (by convention, e.g. a fixed name another module
    /// registered) but never held onto the handle `add` returned.
    pub fn get_handle<T: Clone + 'static>(&self, name: &'static str) -> Option<PropertyHandle<T>> {
        self.find::<T>(name).map(|_| PropertyHandle {
            name: Some(name),
            _marker: std::marker::PhantomData,
        })
    }

    fn find<T: 'static>(&self, name: &str) -> Option<&PropertyArray<T>> {
        self.arrays
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, a)| a.as_any().downcast_ref())
    }

    fn find_mut<T: 'static>(&mut self, name: &str) -> Option<&mut PropertyArray<T>> {
        self.arrays
            .iter_mut()
            .find(|(n, _)| *n == name)
            .and_then(|(_, a)| a.as_any_mut().downcast_mut())
    }

    pub fn get<T: Clone + 'static>(&self, handle: PropertyHandle<T>, i: usize) -> T {
        self.find::<T>(handle.name.expect("use of an invalid property handle"))
            .expect("property handle outlived its store")
            .data[i]
            .clone()
    }

    pub fn set<T: Clone + 'static>(&mut self, handle: PropertyHandle<T>, i: usize, value: T) {
        self.find_mut::<T>(handle.name.expect("use of an invalid property handle"))
            .expect("property handle outlived its store")
            .data[i] = value;
    }

    pub fn slice<T: 'static>(&self, handle: PropertyHandle<T>) -> &[T] {
        &self
            .find::<T>(handle.name.expect("use of an invalid property handle"))
            .expect("property handle outlived its store")
            .data
    }

    pub fn push_back(&mut self) -> usize {
        let idx = self.len;
        self.len += 1;
        for (_, a) in self.arrays.iter_mut() {
            a.push_back();
        }
        idx
    }

    pub fn resize(&mut self, n: usize) {
        self.len = n;
        for (_, a) in self.arrays.iter_mut() {
            a.resize(n);
        }
    }

    pub fn swap(&mut self, i: usize, j: usize) {
        for (_, a) in self.arrays.iter_mut() {
            a.swap(i, j);
        }
    }

    /// Compacts every registered array down to `order.len()` entries,
    /// gathering `order[k]`'s old entry into new slot `k`. Used by
    /// `HalfEdgeMesh::garbage_collect` so every custom property (e.g.
    /// `f:cluster`, `h:texcoord`) survives compaction in lockstep with the
    /// built-in connectivity arrays, instead of being rebuilt from scratch.
    pub fn compact(&mut self, order: &[usize]) {
        self.len = order.len();
        for (_, a) in self.arrays.iter_mut() {
            a.reorder(order);
        }
    }

    /// Copies `other`'s entry `src` into `self`'s already-allocated entry
    /// `dst`, for every array whose name also exists in `self` with a
    /// matching element type. Returns the names of `other`'s properties
    /// that were dropped because `self` holds no same-named array, or one
    /// whose element type doesn't match (§4.4.4 `join_mesh`: "property
    /// arrays with matching name and type are concatenated; non-matching
    /// properties are dropped with a diagnostic"). Unlike `push_back`, this
    /// does not grow `self` — callers that are appending a brand new entity
    /// call `push_back`/`add_vertex`/`add_face` first to get `dst`.
    pub fn copy_entry_from(&mut self, other: &PropertyStore, src: usize, dst: usize) -> Vec<&'static str> {
        let mut dropped = Vec::new();
        for (name, other_arr) in &other.arrays {
            match self.arrays.iter_mut().find(|(n, _)| n == name) {
                Some((_, self_arr)) => {
                    if !self_arr.copy_from(other_arr.as_ref(), src, dst) {
                        dropped.push(*name);
                    }
                }
                None => dropped.push(*name),
            }
        }
        dropped
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}

//! Ordered priority map: an AVL tree keyed by an opaque id, ordered by a
//! comparator over values.
//!
//! Nodes live in an arena and link to each other (and to their parent) by
//! slot index, so rotations are index reassignment only. A side table maps
//! each key to its slot, which makes `get` O(1) and lets `remove` and
//! relocation start at the node instead of searching for it.
//!
//! Ties under the comparator are broken by first-insertion order, so the
//! in-order sequence is a total order even when the comparator is not.

use log::debug;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

type Link = Option<usize>;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    seq: u64,
    height: u32,
    parent: Link,
    left: Link,
    right: Link,
}

/// AVL map ordered by `cmp(value, value)`, then by insertion sequence.
pub struct PriorityMap<K, V, C = fn(&V, &V) -> Ordering> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    root: Link,
    next_seq: u64,
    cmp: C,
}

impl<K, V> PriorityMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Ord,
{
    /// Map ordered by the values' natural order.
    pub fn new() -> Self {
        Self::with_comparator(V::cmp)
    }
}

impl<K, V> Default for PriorityMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C> PriorityMap<K, V, C>
where
    K: Hash + Eq + Clone,
    C: Fn(&V, &V) -> Ordering,
{
    pub fn with_comparator(cmp: C) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            root: None,
            next_seq: 0,
            cmp,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&i| &self.node(i).value)
    }

    /// Height of the tree (0 when empty).
    pub fn height(&self) -> usize {
        self.height_of(self.root) as usize
    }

    /// Inserts, or replaces the value of an existing key and moves its node if
    /// the new value sorts elsewhere. Returns the previous value.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        let existing = self.index.get(&key).copied();
        let Some(i) = existing else {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.insert_node(key, value, seq);
            return None;
        };
        let seq = self.node(i).seq;
        if self.fits_at(i, &value, seq) {
            return Some(std::mem::replace(&mut self.node_mut(i).value, value));
        }
        debug!("priority map relocating node slot={}", i);
        self.index.remove(&key);
        let old = self.unlink(i);
        self.insert_node(key, value, seq);
        Some(old.value)
    }

    /// Removes a key. Returns false (and leaves the map untouched) if absent.
    pub fn remove(&mut self, key: &K) -> bool {
        self.take(key).is_some()
    }

    /// Removes a key and returns its value.
    pub fn take(&mut self, key: &K) -> Option<V> {
        let i = self.index.remove(key)?;
        Some(self.unlink(i).value)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.root = None;
    }

    pub fn first(&self) -> Option<(&K, &V)> {
        self.root.map(|r| {
            let n = self.node(self.leftmost(r));
            (&n.key, &n.value)
        })
    }

    /// In-order iterator. Each call starts a fresh traversal.
    pub fn iter(&self) -> Iter<'_, K, V, C> {
        Iter {
            map: self,
            next: self.root.map(|r| self.leftmost(r)),
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    // --- node access ---

    fn node(&self, i: usize) -> &Node<K, V> {
        match &self.slots[i] {
            Some(n) => n,
            None => unreachable!("priority map link to free slot {}", i),
        }
    }

    fn node_mut(&mut self, i: usize) -> &mut Node<K, V> {
        match &mut self.slots[i] {
            Some(n) => n,
            None => unreachable!("priority map link to free slot {}", i),
        }
    }

    fn alloc(&mut self, node: Node<K, V>) -> usize {
        match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(node);
                i
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, i: usize) -> Node<K, V> {
        let node = match self.slots[i].take() {
            Some(n) => n,
            None => unreachable!("priority map double free of slot {}", i),
        };
        self.free.push(i);
        node
    }

    fn height_of(&self, link: Link) -> u32 {
        link.map_or(0, |i| self.node(i).height)
    }

    fn balance_of(&self, i: usize) -> i64 {
        let n = self.node(i);
        self.height_of(n.left) as i64 - self.height_of(n.right) as i64
    }

    fn update_height(&mut self, i: usize) {
        let n = self.node(i);
        let h = 1 + self.height_of(n.left).max(self.height_of(n.right));
        self.node_mut(i).height = h;
    }

    /// Position of `(value, seq)` relative to node `i`.
    fn order(&self, value: &V, seq: u64, i: usize) -> Ordering {
        let n = self.node(i);
        (self.cmp)(value, &n.value).then(seq.cmp(&n.seq))
    }

    fn leftmost(&self, mut i: usize) -> usize {
        while let Some(l) = self.node(i).left {
            i = l;
        }
        i
    }

    fn rightmost(&self, mut i: usize) -> usize {
        while let Some(r) = self.node(i).right {
            i = r;
        }
        i
    }

    fn successor(&self, i: usize) -> Link {
        if let Some(r) = self.node(i).right {
            return Some(self.leftmost(r));
        }
        let mut child = i;
        let mut parent = self.node(i).parent;
        while let Some(p) = parent {
            if self.node(p).left == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.node(p).parent;
        }
        None
    }

    fn predecessor(&self, i: usize) -> Link {
        if let Some(l) = self.node(i).left {
            return Some(self.rightmost(l));
        }
        let mut child = i;
        let mut parent = self.node(i).parent;
        while let Some(p) = parent {
            if self.node(p).right == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.node(p).parent;
        }
        None
    }

    /// True if node `i` can take `value` without breaking in-order sortedness.
    fn fits_at(&self, i: usize, value: &V, seq: u64) -> bool {
        let after_prev = self
            .predecessor(i)
            .map_or(true, |p| self.order(value, seq, p) == Ordering::Greater);
        let before_next = self
            .successor(i)
            .map_or(true, |s| self.order(value, seq, s) == Ordering::Less);
        after_prev && before_next
    }

    // --- structure ---

    fn insert_node(&mut self, key: K, value: V, seq: u64) {
        let mut parent = None;
        let mut go_left = false;
        let mut cur = self.root;
        while let Some(c) = cur {
            parent = Some(c);
            go_left = self.order(&value, seq, c) == Ordering::Less;
            cur = if go_left { self.node(c).left } else { self.node(c).right };
        }
        let i = self.alloc(Node {
            key: key.clone(),
            value,
            seq,
            height: 1,
            parent,
            left: None,
            right: None,
        });
        self.index.insert(key, i);
        match parent {
            None => self.root = Some(i),
            Some(p) if go_left => self.node_mut(p).left = Some(i),
            Some(p) => self.node_mut(p).right = Some(i),
        }
        self.retrace(parent);
    }

    /// Detaches node `i` (whose key is already gone from the index) and
    /// rebalances. Returns the detached node.
    fn unlink(&mut self, mut i: usize) -> Node<K, V> {
        let (left, right) = {
            let n = self.node(i);
            (n.left, n.right)
        };
        if let (Some(_), Some(r)) = (left, right) {
            // Move the successor's payload into `i`, then detach the
            // successor's slot, which has no left child.
            let s = self.leftmost(r);
            let mut succ = match self.slots[s].take() {
                Some(n) => n,
                None => unreachable!("priority map link to free slot {}", s),
            };
            {
                let n = self.node_mut(i);
                std::mem::swap(&mut n.key, &mut succ.key);
                std::mem::swap(&mut n.value, &mut succ.value);
                std::mem::swap(&mut n.seq, &mut succ.seq);
            }
            let moved_key = self.node(i).key.clone();
            self.index.insert(moved_key, i);
            self.slots[s] = Some(succ);
            i = s;
        }
        let (parent, child) = {
            let n = self.node(i);
            (n.parent, n.left.or(n.right))
        };
        if let Some(c) = child {
            self.node_mut(c).parent = parent;
        }
        self.replace_child(parent, i, child);
        let node = self.release(i);
        self.retrace(parent);
        node
    }

    fn replace_child(&mut self, parent: Link, old: usize, new: Link) {
        match parent {
            None => self.root = new,
            Some(p) => {
                let n = self.node_mut(p);
                if n.left == Some(old) {
                    n.left = new;
                } else {
                    n.right = new;
                }
            }
        }
    }

    /// Walks from `from` to the root fixing heights and rotating where the
    /// subtrees differ by more than one.
    fn retrace(&mut self, mut from: Link) {
        while let Some(i) = from {
            let top = self.rebalance(i);
            from = self.node(top).parent;
        }
    }

    fn rebalance(&mut self, i: usize) -> usize {
        self.update_height(i);
        let balance = self.balance_of(i);
        if balance > 1 {
            let Some(l) = self.node(i).left else {
                unreachable!("left-heavy node without left child")
            };
            if self.balance_of(l) < 0 {
                self.rotate_left(l);
            }
            return self.rotate_right(i);
        }
        if balance < -1 {
            let Some(r) = self.node(i).right else {
                unreachable!("right-heavy node without right child")
            };
            if self.balance_of(r) > 0 {
                self.rotate_right(r);
            }
            return self.rotate_left(i);
        }
        i
    }

    fn rotate_left(&mut self, x: usize) -> usize {
        let Some(y) = self.node(x).right else {
            unreachable!("rotate_left without right child")
        };
        let parent = self.node(x).parent;
        let t2 = self.node(y).left;
        self.node_mut(x).right = t2;
        if let Some(t) = t2 {
            self.node_mut(t).parent = Some(x);
        }
        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);
        self.node_mut(y).parent = parent;
        self.replace_child(parent, x, Some(y));
        self.update_height(x);
        self.update_height(y);
        y
    }

    fn rotate_right(&mut self, y: usize) -> usize {
        let Some(x) = self.node(y).left else {
            unreachable!("rotate_right without left child")
        };
        let parent = self.node(y).parent;
        let t2 = self.node(x).right;
        self.node_mut(y).left = t2;
        if let Some(t) = t2 {
            self.node_mut(t).parent = Some(y);
        }
        self.node_mut(x).right = Some(y);
        self.node_mut(y).parent = Some(x);
        self.node_mut(x).parent = parent;
        self.replace_child(parent, y, Some(x));
        self.update_height(y);
        self.update_height(x);
        x
    }

    /// Checks parent links, cached heights, AVL balance, and in-order
    /// sortedness. Returns a description of the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        if let Some(r) = self.root {
            if self.node(r).parent.is_some() {
                return Err("root has a parent".into());
            }
            self.check_subtree(r)?;
        }
        let mut count = 0;
        let mut prev: Option<usize> = None;
        let mut cur = self.root.map(|r| self.leftmost(r));
        while let Some(i) = cur {
            if let Some(p) = prev {
                let n = self.node(i);
                if self.order(&n.value, n.seq, p) != Ordering::Greater {
                    return Err(format!("in-order violation at slot {}", i));
                }
            }
            count += 1;
            prev = Some(i);
            cur = self.successor(i);
        }
        if count != self.index.len() {
            return Err(format!("{} nodes reachable, {} indexed", count, self.index.len()));
        }
        for (key, &i) in &self.index {
            if self.node(i).key != *key {
                return Err(format!("index points slot {} at the wrong key", i));
            }
        }
        Ok(())
    }

    fn check_subtree(&self, i: usize) -> Result<u32, String> {
        let n = self.node(i);
        let mut hl = 0;
        let mut hr = 0;
        if let Some(l) = n.left {
            if self.node(l).parent != Some(i) {
                return Err(format!("slot {} has a stale parent link", l));
            }
            hl = self.check_subtree(l)?;
        }
        if let Some(r) = n.right {
            if self.node(r).parent != Some(i) {
                return Err(format!("slot {} has a stale parent link", r));
            }
            hr = self.check_subtree(r)?;
        }
        let h = 1 + hl.max(hr);
        if h != n.height {
            return Err(format!("slot {} caches height {} but is {}", i, n.height, h));
        }
        if (hl as i64 - hr as i64).abs() > 1 {
            return Err(format!("slot {} is unbalanced ({} vs {})", i, hl, hr));
        }
        Ok(h)
    }
}

impl<K, V, C> fmt::Debug for PriorityMap<K, V, C>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: fmt::Debug,
    C: Fn(&V, &V) -> Ordering,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// In-order iterator over a [`PriorityMap`].
pub struct Iter<'a, K, V, C> {
    map: &'a PriorityMap<K, V, C>,
    next: Link,
}

impl<'a, K, V, C> Iterator for Iter<'a, K, V, C>
where
    K: Hash + Eq + Clone,
    C: Fn(&V, &V) -> Ordering,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.next?;
        let map = self.map;
        self.next = map.successor(i);
        let n = map.node(i);
        Some((&n.key, &n.value))
    }
}

impl<'a, K, V, C> IntoIterator for &'a PriorityMap<K, V, C>
where
    K: Hash + Eq + Clone,
    C: Fn(&V, &V) -> Ordering,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

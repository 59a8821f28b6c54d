//! A sorted, singly-linked sequence stored in an arena of slots.
//!
//! Nodes live in a `SlotMap` and link to each other by key, so inserting and
//! removing never moves other items and freed slots are reused by the next
//! insertion.

use crate::common::NodeKey;
use slotmap::SlotMap;
use std::cmp::Ordering;

struct Node<T> {
    item: T,
    next: Option<NodeKey>,
}

/// An ascending sequence with O(n) ordered insertion and O(1) access to the front.
pub struct OrderedEventList<T> {
    nodes: SlotMap<NodeKey, Node<T>>,
    head: Option<NodeKey>,
    tail: Option<NodeKey>,
}

impl<T> OrderedEventList<T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            head: None,
            tail: None,
        }
    }

    /// Creates an empty list with room for `capacity` items before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: SlotMap::with_capacity_and_key(capacity),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Inserts `item` before the first element that does not compare less than it.
    ///
    /// An item equal to existing ones therefore lands in front of them.
    pub fn insert_ordered_by<F>(&mut self, item: T, mut compare: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let mut previous: Option<NodeKey> = None;
        let mut current = self.head;
        while let Some(key) = current {
            let node = &self.nodes[key];
            if compare(&node.item, &item) != Ordering::Less {
                break;
            }
            previous = Some(key);
            current = node.next;
        }

        let key = self.nodes.insert(Node {
            item,
            next: current,
        });
        match previous {
            Some(prev) => self.nodes[prev].next = Some(key),
            None => self.head = Some(key),
        }
        if current.is_none() {
            self.tail = Some(key);
        }
    }

    /// Appends `item` at the back without looking at the ordering.
    pub fn push_back(&mut self, item: T) {
        let key = self.nodes.insert(Node { item, next: None });
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
    }

    /// Returns the smallest item without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.head.map(|key| &self.nodes[key].item)
    }

    /// Removes and returns the smallest item.
    pub fn pop_front(&mut self) -> Option<T> {
        let key = self.head?;
        let node = self.nodes.remove(key)?;
        self.head = node.next;
        if self.head.is_none() {
            self.tail = None;
        }
        Some(node.item)
    }

    /// Removes and returns the largest item. This walks the whole list.
    pub fn pop_back(&mut self) -> Option<T> {
        let tail = self.tail?;
        let mut previous = None;
        let mut current = self.head;
        while let Some(key) = current {
            if key == tail {
                break;
            }
            previous = Some(key);
            current = self.nodes[key].next;
        }

        let node = self.nodes.remove(tail)?;
        match previous {
            Some(prev) => self.nodes[prev].next = None,
            None => self.head = None,
        }
        self.tail = previous;
        Some(node.item)
    }

    /// Discards every item.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.head = None;
        self.tail = None;
    }

    /// Iterates from the smallest item to the largest.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            next: self.head,
        }
    }
}

impl<T: Ord> OrderedEventList<T> {
    /// Inserts `item` using its natural ordering.
    pub fn insert_ordered(&mut self, item: T) {
        self.insert_ordered_by(item, T::cmp);
    }
}

impl<T> Default for OrderedEventList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for OrderedEventList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Borrowing iterator over an `OrderedEventList`, front to back.
pub struct Iter<'a, T> {
    list: &'a OrderedEventList<T>,
    next: Option<NodeKey>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = &self.list.nodes[self.next?];
        self.next = node.next;
        Some(&node.item)
    }
}

impl<'a, T> IntoIterator for &'a OrderedEventList<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

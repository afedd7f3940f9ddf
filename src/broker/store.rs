//! Retention queue
//!
//! `MessageStore` keeps the recently published messages of one topic in
//! publish order, oldest first. It is plain data owned by the topic actor,
//! so nothing in here synchronizes.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::broker::message::{MessageId, TopicItem};

#[derive(Debug)]
pub struct MessageStore {
    items: VecDeque<TopicItem>,
    max_age: TimeDelta,
    max_len: usize,
}

impl MessageStore {
    pub fn new(max_age: Duration, max_len: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_age: TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX),
            max_len,
        }
    }

    /// Appends a freshly published message, dropping the oldest entries if
    /// the count limit is exceeded.
    pub fn push(&mut self, item: TopicItem) {
        self.items.push_back(item);
        self.trim_to_len();
    }

    /// Applies both eviction rules. Returns how many messages were dropped.
    pub fn collect_garbage(&mut self) -> usize {
        self.collect_garbage_at(Utc::now())
    }

    pub fn collect_garbage_at(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.items.len();
        let max_age = self.max_age;
        // retain rather than pop_front: wall clock steps can reorder timestamps
        self.items.retain(|item| now - item.created_at <= max_age);
        self.trim_to_len();
        before - self.items.len()
    }

    fn trim_to_len(&mut self) {
        if self.items.len() > self.max_len {
            let excess = self.items.len() - self.max_len;
            self.items.drain(..excess);
        }
    }

    /// Every retained message, oldest first.
    pub fn snapshot(&self) -> Vec<TopicItem> {
        self.items.iter().cloned().collect()
    }

    /// Retained messages with `id > since`, oldest first.
    pub fn since(&self, since: MessageId) -> Vec<TopicItem> {
        let start = self.items.partition_point(|item| item.id <= since);
        self.items.range(start..).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

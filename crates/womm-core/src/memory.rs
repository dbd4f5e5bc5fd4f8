// SPDX-License-Identifier: CEPL-1.0
//! Tagged accounting for variable-lifetime CPU allocations.
//!
//! [`MemTracker`] only counts; the allocations themselves stay ordinary
//! Rust values. [`TrackedVec`] keeps a `Vec`'s capacity registered under a
//! tag for as long as it lives.

use crate::units::scale_bytes;
use portable_atomic::{AtomicU64, Ordering};
use std::fmt::Write as _;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemTag {
    Unknown,
    Engine,
    Game,
    Arena,
    Render,
    Audio,
    Array,
    DynArray,
    String,
    Resource,
}

impl MemTag {
    pub const COUNT: usize = 10;
    pub const ALL: [MemTag; Self::COUNT] = [
        MemTag::Unknown,
        MemTag::Engine,
        MemTag::Game,
        MemTag::Arena,
        MemTag::Render,
        MemTag::Audio,
        MemTag::Array,
        MemTag::DynArray,
        MemTag::String,
        MemTag::Resource,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MemTag::Unknown => "MEM_UNKNOWN",
            MemTag::Engine => "MEM_ENGINE",
            MemTag::Game => "MEM_GAME",
            MemTag::Arena => "MEM_ARENA",
            MemTag::Render => "MEM_RENDER",
            MemTag::Audio => "MEM_AUDIO",
            MemTag::Array => "MEM_ARRAY",
            MemTag::DynArray => "MEM_DYNARRAY",
            MemTag::String => "MEM_STRING",
            MemTag::Resource => "MEM_RESOURCE",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug)]
pub struct MemTracker {
    total: AtomicU64,
    bytes: [AtomicU64; MemTag::COUNT],
    counts: [AtomicU64; MemTag::COUNT],
}

impl Default for MemTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemTracker {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            bytes: std::array::from_fn(|_| AtomicU64::new(0)),
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn track(&self, tag: MemTag, bytes: u64) {
        let i = tag.index();
        self.total.fetch_add(bytes, Ordering::Relaxed);
        self.bytes[i].fetch_add(bytes, Ordering::Relaxed);
        self.counts[i].fetch_add(1, Ordering::Relaxed);
    }

    /// Reverse one [`track`](Self::track). Untracking more than was tracked
    /// under `tag` is a caller bug and panics.
    pub fn untrack(&self, tag: MemTag, bytes: u64) {
        let i = tag.index();
        sub_or_panic(&self.bytes[i], bytes, tag);
        sub_or_panic(&self.counts[i], 1, tag);
        sub_or_panic(&self.total, bytes, tag);
    }

    pub fn live_bytes(&self, tag: MemTag) -> u64 {
        self.bytes[tag.index()].load(Ordering::Relaxed)
    }

    pub fn live_count(&self, tag: MemTag) -> u64 {
        self.counts[tag.index()].load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> String {
        let mut out = String::from("Game Memory Used:\n");
        for tag in MemTag::ALL {
            let count = self.live_count(tag);
            if count == 0 {
                continue;
            }
            let (amount, unit) = scale_bytes(self.live_bytes(tag));
            let _ = writeln!(out, "--> {}: [{count}] {amount:.2}{unit}", tag.label());
        }
        out
    }

    /// `None` when every tracked allocation has been released.
    pub fn leak_report(&self) -> Option<String> {
        let leaked: Vec<MemTag> = MemTag::ALL
            .into_iter()
            .filter(|&t| self.live_count(t) > 0)
            .collect();
        if leaked.is_empty() {
            return None;
        }

        let mut out = String::new();
        for tag in leaked {
            let _ = writeln!(
                out,
                "{} bytes in {} allocation(s) [{}]",
                self.live_bytes(tag),
                self.live_count(tag),
                tag.label()
            );
        }
        Some(out)
    }

    pub fn log_leaks(&self) {
        match self.leak_report() {
            None => info!("no memory leaks detected"),
            Some(report) => {
                for line in report.lines() {
                    warn!("leak: {line}");
                }
            }
        }
    }
}

fn sub_or_panic(counter: &AtomicU64, amount: u64, tag: MemTag) {
    let res = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(amount));
    if res.is_err() {
        panic!("mismatched untrack of {amount} under {}", tag.label());
    }
}

/// A `Vec` whose heap capacity is accounted under a [`MemTag`].
pub struct TrackedVec<T> {
    items: Vec<T>,
    tag: MemTag,
    tracker: Arc<MemTracker>,
    tracked: u64,
}

impl<T> TrackedVec<T> {
    pub fn new(tracker: &Arc<MemTracker>, tag: MemTag) -> Self {
        Self::from_vec(tracker, tag, Vec::new())
    }

    pub fn from_vec(tracker: &Arc<MemTracker>, tag: MemTag, items: Vec<T>) -> Self {
        let mut v = Self {
            items,
            tag,
            tracker: Arc::clone(tracker),
            tracked: 0,
        };
        v.sync();
        v
    }

    pub fn push(&mut self, value: T) {
        self.items.push(value);
        self.sync();
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Replace the contents, re-accounting the new capacity.
    pub fn replace(&mut self, items: Vec<T>) -> Vec<T> {
        let old = std::mem::replace(&mut self.items, items);
        self.sync();
        old
    }

    pub fn tracked_bytes(&self) -> u64 {
        self.tracked
    }

    fn sync(&mut self) {
        let now = (self.items.capacity() * std::mem::size_of::<T>()) as u64;
        if now == self.tracked {
            return;
        }
        if self.tracked > 0 {
            self.tracker.untrack(self.tag, self.tracked);
        }
        if now > 0 {
            self.tracker.track(self.tag, now);
        }
        self.tracked = now;
    }
}

impl<T> Deref for TrackedVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> DerefMut for TrackedVec<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.items
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for TrackedVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

impl<T> Drop for TrackedVec<T> {
    fn drop(&mut self) {
        if self.tracked > 0 {
            self.tracker.untrack(self.tag, self.tracked);
        }
    }
}

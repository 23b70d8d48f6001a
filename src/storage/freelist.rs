//! Intrusive free-cluster list.
//!
//! Free clusters are threaded through their own next-pointers, LIFO, with
//! the head and count persisted in the header. No extra space is consumed
//! and the whole list is reconstructible from the header alone after a
//! crash. The storage layer performs the actual cluster I/O; this type
//! tracks the head/count bookkeeping.

use crate::error::{Result, StorageError};
use crate::header::NIL_CLUSTER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeList {
    head: u64,
    count: u64,
}

impl FreeList {
    pub fn new() -> Self {
        FreeList {
            head: NIL_CLUSTER,
            count: 0,
        }
    }

    pub fn from_header(head: u64, count: u64) -> Result<Self> {
        if (count == 0) != (head == NIL_CLUSTER) {
            return Err(StorageError::CorruptStorage(format!(
                "free list head {:#x} disagrees with count {}",
                head, count
            )));
        }
        Ok(FreeList { head, count })
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Take the head cluster. `next_of_head` is the next-pointer stored in
    /// that cluster, which becomes the new head.
    pub fn pop(&mut self, next_of_head: u64) -> Result<u64> {
        if self.is_empty() {
            return Err(StorageError::CorruptStorage(
                "pop from empty free list".into(),
            ));
        }
        let taken = self.head;
        self.head = next_of_head;
        self.count -= 1;
        if (self.count == 0) != (self.head == NIL_CLUSTER) {
            return Err(StorageError::CorruptStorage(format!(
                "free list ends early: {} clusters remain but next is {:#x}",
                self.count, self.head
            )));
        }
        Ok(taken)
    }

    /// Push `cluster` as the new head; returns the previous head, which the
    /// caller must write into the cluster's next-pointer.
    pub fn push(&mut self, cluster: u64) -> u64 {
        let previous = self.head;
        self.head = cluster;
        self.count += 1;
        previous
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

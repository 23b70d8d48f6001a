//! RAII record write scopes.
//!
//! A [`RecordScope`] brackets one record mutation: Opened (scope entered,
//! target resolved) -> Written (bytes staged through `io::Write`) -> Closed
//! (directory entry and header finalized on commit). The scope borrows the
//! storage mutably, so overlapping scopes cannot be expressed; a leaked
//! scope trips the storage's guard and surfaces as `ConcurrentAccess`.
//!
//! Disposal policy is commit-partial: dropping a scope without calling
//! [`RecordScope::commit`] commits whatever bytes were staged, with a
//! correctly recorded length. [`RecordScope::rollback`] abandons them.
//! Errors on the drop path cannot propagate and are logged instead; the
//! open-time cross-validation catches any inconsistency they leave behind.

use super::ClusteredStorage;
use crate::error::{Result, StorageError};
use std::io::{Read, Seek, Write};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    Add,
    Insert(usize),
    Update(usize),
}

/// Write scope over a single record.
pub struct RecordScope<'a, S: Read + Write + Seek> {
    storage: &'a mut ClusteredStorage<S>,
    kind: ScopeKind,
    buffer: Vec<u8>,
    key: Option<Vec<u8>>,
    finished: bool,
}

impl<'a, S: Read + Write + Seek> RecordScope<'a, S> {
    pub(crate) fn new(storage: &'a mut ClusteredStorage<S>, kind: ScopeKind) -> Self {
        RecordScope {
            storage,
            kind,
            buffer: Vec::new(),
            key: None,
            finished: false,
        }
    }

    /// Stage record bytes. Multiple calls append.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Set the record's key blob (must fit the storage's key width).
    ///
    /// Updates keep the existing key when no new key is set.
    pub fn set_key(&mut self, key: &[u8]) -> Result<()> {
        let max = self.storage.key_size() as usize;
        if key.len() > max {
            return Err(StorageError::KeyTooLarge {
                len: key.len(),
                max,
            });
        }
        self.key = Some(key.to_vec());
        Ok(())
    }

    /// Bytes staged so far.
    pub fn written_len(&self) -> usize {
        self.buffer.len()
    }

    /// Finalize: allocate the chain, write clusters, update the directory
    /// entry, persist metadata. Returns the record's directory index.
    pub fn commit(mut self) -> Result<usize> {
        let result = self.finalize();
        self.finished = true;
        self.storage.end_scope();
        result
    }

    /// Abandon staged bytes without touching the record.
    pub fn rollback(mut self) {
        self.finished = true;
        self.storage.end_scope();
    }

    fn finalize(&mut self) -> Result<usize> {
        let key = self.key.take();
        match self.kind {
            ScopeKind::Add => self.storage.finish_add(&self.buffer, key),
            ScopeKind::Insert(index) => self.storage.finish_insert(index, &self.buffer, key),
            ScopeKind::Update(index) => self.storage.finish_update(index, &self.buffer, key),
        }
    }
}

impl<S: Read + Write + Seek> Write for RecordScope<'_, S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<S: Read + Write + Seek> Drop for RecordScope<'_, S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Commit-partial disposal. Unconditional on all exit paths.
        if let Err(err) = self.finalize() {
            error!(kind = ?self.kind, %err, "record scope drop-commit failed");
        }
        self.storage.end_scope();
    }
}

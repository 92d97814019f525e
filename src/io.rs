// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The byte-reader collaborator surface.
//!
//! Real readers live outside this crate; all that is fixed here is their
//! shape: a read is requested now and its bytes arrive through a
//! [`Future`]. [`CursorReader`] is the in-memory implementation used by
//! tests and examples.

use crate::executor::Executor;
use crate::future::{run_async_on, Future};
use std::sync::Arc;

/// An asynchronous source of bytes.
pub trait AsyncByteReader {
    /// Requests up to `max` bytes. The future resolves with an empty vector
    /// at end of input.
    fn read(&mut self, max: usize) -> Future<Vec<u8>>;
}

/// A reader over an in-memory buffer, serving each read through an
/// executor.
pub struct CursorReader<E: Executor + ?Sized + 'static> {
    data: Arc<Vec<u8>>,
    pos: usize,
    exec: Arc<E>,
}

// === impl CursorReader ===

impl<E: Executor + ?Sized + 'static> CursorReader<E> {
    pub fn new(exec: Arc<E>, data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            pos: 0,
            exec,
        }
    }
}

impl<E: Executor + ?Sized + 'static> AsyncByteReader for CursorReader<E> {
    fn read(&mut self, max: usize) -> Future<Vec<u8>> {
        let start = self.pos;
        let end = (start + max).min(self.data.len());
        self.pos = end;
        let data = self.data.clone();
        run_async_on(&self.exec, move || data[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ThreadPool;

    #[test]
    fn reads_in_chunks_until_empty() {
        let pool = Arc::new(ThreadPool::new(1));
        let mut reader = CursorReader::new(pool, b"hello world".to_vec());
        assert_eq!(reader.read(5).get().as_slice(), b"hello");
        assert_eq!(reader.read(5).get().as_slice(), b" worl");
        assert_eq!(reader.read(5).get().as_slice(), b"d");
        assert!(reader.read(5).get().is_empty());
    }
}

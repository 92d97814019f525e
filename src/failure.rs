// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Captured errors of asynchronous computations.
//!
//! A user computation that panics inside a combinator closure or a coroutine
//! does not tear the process down; the payload is caught at the library
//! boundary and stored as a [`Failure`] in the cell or stream that the
//! computation feeds. Consumers observe it through [`Future::error`],
//! [`catch_all`] style handlers, or a re-raise on [`Future::get`].
//!
//! A `Failure` is cheap to clone and may be observed from any number of
//! threads. Re-raising puts the `Failure` itself back on the wire as the
//! panic payload, so an error that crosses several composition layers keeps
//! its identity the whole way down.
//!
//! [`Future::error`]: crate::future::Future::error
//! [`Future::get`]: crate::future::Future::get
//! [`catch_all`]: crate::future::Future::catch_all

use core::fmt;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

type Payload = Box<dyn Any + Send>;

/// A captured error of an asynchronous computation.
///
/// Wraps either a panic payload caught by the library or a value handed to
/// [`Promise::fail`](crate::future::Promise::fail). Clones share the same
/// underlying payload.
#[derive(Clone)]
pub struct Failure {
    payload: Arc<Mutex<Payload>>,
}

impl Failure {
    /// Wraps a typed error value.
    pub fn new<E: Send + 'static>(err: E) -> Self {
        Self {
            payload: Arc::new(Mutex::new(Box::new(err))),
        }
    }

    /// Wraps a payload caught by `catch_unwind`.
    ///
    /// A payload that is itself a `Failure` (a re-raise further down the
    /// chain) is unwrapped so the original handle is shared rather than
    /// nested.
    pub fn from_panic(payload: Payload) -> Self {
        match payload.downcast::<Failure>() {
            Ok(this) => *this,
            Err(payload) => Self {
                payload: Arc::new(Mutex::new(payload)),
            },
        }
    }

    /// Returns true if the stored payload is of type `E`.
    pub fn is<E: 'static>(&self) -> bool {
        self.payload.lock().unwrap().is::<E>()
    }

    /// Returns a copy of the stored payload, if it is of type `E`.
    pub fn downcast<E: Clone + 'static>(&self) -> Option<E> {
        self.payload.lock().unwrap().downcast_ref::<E>().cloned()
    }

    /// Returns the panic message for `&str` and `String` payloads.
    pub fn message(&self) -> Option<String> {
        let payload = self.payload.lock().unwrap();
        if let Some(s) = payload.downcast_ref::<&'static str>() {
            Some((*s).to_string())
        } else {
            payload.downcast_ref::<String>().cloned()
        }
    }

    /// Re-raises the failure on the current thread.
    ///
    /// The payload is this handle itself, so a capture further up the stack
    /// (another combinator, a coroutine driver) stores the same `Failure`.
    pub fn raise(&self) -> ! {
        panic::resume_unwind(Box::new(self.clone()))
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "Failure({msg:?})"),
            None => f.pad("Failure(..)"),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => f.write_str(&msg),
            None => f.pad("asynchronous computation failed"),
        }
    }
}

impl std::error::Error for Failure {}

/// Runs a user computation, converting a panic into a [`Failure`].
///
/// Every user-supplied closure invoked by the combinators and every
/// coroutine body runs under this. The `AssertUnwindSafe` is justified by
/// the call sites: the closure is consumed by the call and nothing observes
/// its captures afterwards.
pub fn catching<R>(f: impl FnOnce() -> R) -> Result<R, Failure> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(Failure::from_panic)
}

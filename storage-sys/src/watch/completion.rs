// SPDX-License-Identifier: GPL-3.0-only

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

/// A signal that can be resolved at most once, from any thread.
///
/// Every producer holds a clone of the `Arc`; the single consumer awaits the
/// receiver handed out by [`CompleteOnce::new`]. Later calls to
/// [`complete`](Self::complete) are no-ops.
#[derive(Debug)]
pub struct CompleteOnce<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> CompleteOnce<T> {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<T>) {
        let (sender, receiver) = oneshot::channel();
        let signal = Arc::new(Self {
            sender: Mutex::new(Some(sender)),
        });
        (signal, receiver)
    }

    /// Resolve the signal with `value`.
    ///
    /// Returns `true` only for the call that actually resolved it.
    pub fn complete(&self, value: T) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            // A dropped receiver still counts as resolved: nobody may fire again.
            Some(sender) => {
                let _ = sender.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

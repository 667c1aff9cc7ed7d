//! Single-pass iterators over a map's outputs.

use std::time::Duration;

use serde_json::Value;

use crate::handle::MapHandle;
use crate::wait::poll_until;
use crate::{Error, Result};

/// Outputs in component order.
///
/// A failed component yields [`Error::ComponentError`] and iteration goes
/// on. Any other error (timeout, removal, corrupt log) ends the iterator.
pub struct OrderedOutputs<'a> {
    handle: &'a MapHandle,
    next: usize,
    timeout: Option<Duration>,
    fused: bool,
}

impl<'a> OrderedOutputs<'a> {
    pub(crate) fn new(handle: &'a MapHandle, timeout: Option<Duration>) -> Self {
        Self {
            handle,
            next: 0,
            timeout,
            fused: false,
        }
    }
}

impl Iterator for OrderedOutputs<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused || self.next >= self.handle.len() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let item = self.handle.get(index, self.timeout);
        if let Err(err) = &item
            && !matches!(err, Error::ComponentError { .. })
        {
            self.fused = true;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.fused {
            0
        } else {
            self.handle.len().saturating_sub(self.next)
        };
        (0, Some(remaining))
    }
}

/// Outputs in arrival order; same error policy as [`OrderedOutputs`].
pub struct AvailableOutputs<'a> {
    handle: &'a MapHandle,
    pending: Vec<usize>,
    timeout: Option<Duration>,
}

impl<'a> AvailableOutputs<'a> {
    pub(crate) fn new(handle: &'a MapHandle, timeout: Option<Duration>) -> Self {
        Self {
            handle,
            pending: (0..handle.len()).collect(),
            timeout,
        }
    }
}

impl Iterator for AvailableOutputs<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() {
            return None;
        }
        let handle = self.handle;
        let pending = &self.pending;
        match poll_until(self.timeout, handle.poll_interval(), || handle.first_ready(pending)) {
            Ok((pos, ready)) => {
                let index = self.pending.remove(pos);
                Some(handle.into_value(index, ready))
            }
            Err(err) => {
                self.pending.clear();
                Some(Err(handle.timeout_error(err)))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.pending.len()))
    }
}

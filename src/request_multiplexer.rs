//! Generic request multiplexer.
//!
//! Holds one request per client in insertion order and keeps a cached
//! "maximal request": the fold of [`MultiplexedRequest::merge_with`] over
//! every stored request, starting from `R::default()`.

use heapless::Vec;

use crate::error::Error;

/// A request type that can be folded into a single maximal request.
pub trait MultiplexedRequest: Default + Clone {
    /// Merge `other` into `self`, returning whether any observable
    /// attribute of `self` changed.
    fn merge_with(&mut self, other: &Self) -> Result<bool, Error>;

    /// Whether two requests would configure the hardware identically.
    fn is_equivalent_to(&self, other: &Self) -> bool;
}

pub struct RequestMultiplexer<R, const N: usize> {
    requests: Vec<R, N>,
    current_maximal_request: R,
}

impl<R: MultiplexedRequest, const N: usize> Default for RequestMultiplexer<R, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: MultiplexedRequest, const N: usize> RequestMultiplexer<R, N> {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            current_maximal_request: R::default(),
        }
    }

    /// Append a request.
    ///
    /// Returns the index it was stored at and whether the maximal request
    /// changed. On failure the multiplexer is left untouched.
    pub fn add_request(&mut self, request: R) -> Result<(usize, bool), Error> {
        self.requests
            .push(request)
            .map_err(|_| Error::ClientCapacity)?;
        let index = self.requests.len() - 1;

        match self.update_maximal_request() {
            Ok(changed) => Ok((index, changed)),
            Err(e) => {
                self.requests.pop();
                Err(e)
            }
        }
    }

    /// Replace the request stored at `index`.
    ///
    /// A client's new request supersedes its old one outright; the fold
    /// across all entries is then recomputed. On failure the previous
    /// request is restored.
    pub fn update_request(&mut self, index: usize, request: R) -> Result<bool, Error> {
        let slot = self.requests.get_mut(index).ok_or(Error::InvalidArgument)?;
        let previous = core::mem::replace(slot, request);

        match self.update_maximal_request() {
            Ok(changed) => Ok(changed),
            Err(e) => {
                self.requests[index] = previous;
                Err(e)
            }
        }
    }

    /// Remove the request at `index`, returning whether the maximal
    /// request changed.
    pub fn remove_request(&mut self, index: usize) -> Result<bool, Error> {
        if index >= self.requests.len() {
            return Err(Error::InvalidArgument);
        }
        self.requests.remove(index);
        self.update_maximal_request()
    }

    pub fn requests(&self) -> &[R] {
        &self.requests
    }

    /// Mutable access to the stored requests.
    ///
    /// Callers must only touch bookkeeping that does not take part in the
    /// merge; the cached maximal request is not recomputed.
    pub fn requests_mut(&mut self) -> &mut [R] {
        &mut self.requests
    }

    pub fn current_maximal_request(&self) -> &R {
        &self.current_maximal_request
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Remove every request matching `pred`, recomputing the maximal
    /// request once at the end.
    pub(crate) fn remove_where<F>(&mut self, mut pred: F) -> Result<bool, Error>
    where
        F: FnMut(&R) -> bool,
    {
        let removed = self.erase_where(&mut pred);
        if removed == 0 {
            return Ok(false);
        }
        self.update_maximal_request()
    }

    /// Remove every request matching `pred` without touching the cached
    /// maximal request. Only valid for requests that never contribute to
    /// the fold.
    pub(crate) fn remove_where_unfolded<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&R) -> bool,
    {
        self.erase_where(&mut pred)
    }

    fn erase_where<F>(&mut self, pred: &mut F) -> usize
    where
        F: FnMut(&R) -> bool,
    {
        let mut removed = 0;
        let mut i = 0;
        while i < self.requests.len() {
            if pred(&self.requests[i]) {
                // Later entries shift down into slot `i`.
                self.requests.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        removed
    }

    fn update_maximal_request(&mut self) -> Result<bool, Error> {
        let mut maximal = R::default();
        for request in self.requests.iter() {
            maximal.merge_with(request)?;
        }

        let changed = !self.current_maximal_request.is_equivalent_to(&maximal);
        if changed {
            self.current_maximal_request = maximal;
        }
        Ok(changed)
    }
}

//! Collective communication substrate
//!
//! The container framework is written against the [`Communicator`]
//! trait: a bulk-synchronous rank group offering barriers, all-to-all
//! exchanges, sum all-reduce and non-blocking point-to-point transfers.
//! Every rank of the group must enter each collective; completion on
//! one rank implies entry by all. A rank that skips a collective
//! deadlocks the group, so the container APIs are careful to execute
//! their full collective sequence even for empty inputs.
//!
//! The trait is the seam an MPI-backed substrate would fill. The
//! in-process [`ThreadComm`] implementation in [`thread`] runs one rank
//! per OS thread and backs the tests and the CLI.

pub mod thread;

pub use thread::{spawn_group, ThreadComm};

/// Marker for types that can travel between ranks
pub trait Wire: Send + 'static {}

impl<T: Send + 'static> Wire for T {}

/// Handle for a non-blocking send; dropping without waiting is allowed
/// but completion is only guaranteed after [`SendRequest::wait`]
pub struct SendRequest(Box<dyn FnOnce() + Send>);

impl SendRequest {
    /// Wrap a completion action
    pub fn new(complete: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(complete))
    }

    /// Block until the send has completed
    pub fn wait(self) {
        (self.0)()
    }
}

/// Handle for a non-blocking receive
pub struct RecvRequest<T>(Box<dyn FnOnce() -> Vec<T> + Send>);

impl<T> RecvRequest<T> {
    /// Wrap a completion action producing the received payload
    pub fn new(complete: impl FnOnce() -> Vec<T> + Send + 'static) -> Self {
        Self(Box::new(complete))
    }

    /// Block until the matching message arrives and take its payload
    pub fn wait(self) -> Vec<T> {
        (self.0)()
    }
}

/// A bulk-synchronous rank group
pub trait Communicator: Send {
    /// This rank's index in `[0, size)`
    fn rank(&self) -> usize;

    /// Number of ranks in the group
    fn size(&self) -> usize;

    /// Block until every rank has entered the barrier
    fn barrier(&self);

    /// Exchange one value per peer; element `i` of the result came from
    /// rank `i`
    fn all_to_all(&self, send: &[u64]) -> Vec<u64>;

    /// Exchange variable-length typed segments. `parts[i]` is delivered
    /// to rank `i`; the result is the concatenation of the segments
    /// received, in source-rank order, with their lengths.
    fn all_to_allv<T: Wire>(&self, parts: Vec<Vec<T>>) -> (Vec<T>, Vec<usize>);

    /// Element-wise global sum; every rank receives the same result
    fn all_reduce_sum(&self, local: &[u64]) -> Vec<u64>;

    /// Post a non-blocking send of `payload` to rank `to` under `tag`
    fn isend<T: Wire>(&self, to: usize, tag: u64, payload: Vec<T>) -> SendRequest;

    /// Post a non-blocking receive matching (`from`, `tag`)
    fn irecv<T: Wire>(&self, from: usize, tag: u64) -> RecvRequest<T>;
}

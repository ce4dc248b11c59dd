//! In-process SPMD thread group
//!
//! One OS thread per rank, sharing a slot matrix for collectives and a
//! condvar mailbox per rank for point-to-point transfers. Payloads move
//! by ownership, so "wire" traffic is a pointer handoff. The group is
//! not a performance substrate; it exists so the collective semantics
//! of the containers can be exercised in a single process.

use super::{Communicator, RecvRequest, SendRequest, Wire};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Barrier, Condvar, Mutex};

type Payload = Box<dyn Any + Send>;

// Messages between one (source, tag) pair are non-overtaking: they
// queue in send order and are received in that order, so a rank that
// runs ahead into the next collective cannot clobber in-flight traffic.
struct Mailbox {
    slots: Mutex<HashMap<(usize, u64), VecDeque<Payload>>>,
    ready: Condvar,
}

struct Shared {
    size: usize,
    barrier: Barrier,
    // P x P matrix, cell [src * size + dst], used by the collectives
    cells: Mutex<Vec<Option<Payload>>>,
    // one slot per source rank, overwritten by its owner each round
    reduce_slots: Mutex<Vec<Option<Vec<u64>>>>,
    mailboxes: Vec<Mailbox>,
}

/// One rank's endpoint of an in-process thread group
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    /// Create a group of `size` connected endpoints, one per rank
    pub fn group(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "rank group must have at least one rank");
        let shared = Arc::new(Shared {
            size,
            barrier: Barrier::new(size),
            cells: Mutex::new((0..size * size).map(|_| None).collect()),
            reduce_slots: Mutex::new(vec![None; size]),
            mailboxes: (0..size)
                .map(|_| Mailbox {
                    slots: Mutex::new(HashMap::new()),
                    ready: Condvar::new(),
                })
                .collect(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn all_to_all(&self, send: &[u64]) -> Vec<u64> {
        assert_eq!(send.len(), self.shared.size);
        let parts = send.iter().map(|&v| vec![v]).collect();
        let (flat, _) = self.all_to_allv(parts);
        flat
    }

    fn all_to_allv<T: Wire>(&self, parts: Vec<Vec<T>>) -> (Vec<T>, Vec<usize>) {
        let p = self.shared.size;
        assert_eq!(parts.len(), p, "one segment per destination rank");
        {
            let mut cells = self.shared.cells.lock().unwrap();
            for (dst, part) in parts.into_iter().enumerate() {
                cells[self.rank * p + dst] = Some(Box::new(part));
            }
        }
        self.shared.barrier.wait();
        let mut items = Vec::new();
        let mut counts = Vec::with_capacity(p);
        {
            let mut cells = self.shared.cells.lock().unwrap();
            for src in 0..p {
                let boxed = cells[src * p + self.rank]
                    .take()
                    .expect("collective slot empty: ranks disagree on the operation");
                let part = *boxed
                    .downcast::<Vec<T>>()
                    .expect("collective payload type mismatch");
                counts.push(part.len());
                items.extend(part);
            }
        }
        self.shared.barrier.wait();
        (items, counts)
    }

    fn all_reduce_sum(&self, local: &[u64]) -> Vec<u64> {
        {
            let mut slots = self.shared.reduce_slots.lock().unwrap();
            slots[self.rank] = Some(local.to_vec());
        }
        self.shared.barrier.wait();
        let mut sum = vec![0u64; local.len()];
        {
            let slots = self.shared.reduce_slots.lock().unwrap();
            for slot in slots.iter() {
                let contribution = slot
                    .as_ref()
                    .expect("reduce slot empty: ranks disagree on the operation");
                assert_eq!(contribution.len(), sum.len(), "all-reduce length mismatch");
                for (acc, &v) in sum.iter_mut().zip(contribution) {
                    *acc += v;
                }
            }
        }
        self.shared.barrier.wait();
        sum
    }

    fn isend<T: Wire>(&self, to: usize, tag: u64, payload: Vec<T>) -> SendRequest {
        let mailbox = &self.shared.mailboxes[to];
        {
            let mut slots = mailbox.slots.lock().unwrap();
            slots
                .entry((self.rank, tag))
                .or_default()
                .push_back(Box::new(payload));
        }
        mailbox.ready.notify_all();
        // the payload is buffered at the destination, so the send is
        // already complete
        SendRequest::new(|| {})
    }

    fn irecv<T: Wire>(&self, from: usize, tag: u64) -> RecvRequest<T> {
        let shared = Arc::clone(&self.shared);
        let me = self.rank;
        RecvRequest::new(move || {
            let mailbox = &shared.mailboxes[me];
            let mut slots = mailbox.slots.lock().unwrap();
            loop {
                if let Some(queue) = slots.get_mut(&(from, tag)) {
                    if let Some(payload) = queue.pop_front() {
                        if queue.is_empty() {
                            slots.remove(&(from, tag));
                        }
                        return *payload
                            .downcast::<Vec<T>>()
                            .expect("point-to-point payload type mismatch");
                    }
                }
                slots = mailbox.ready.wait(slots).unwrap();
            }
        })
    }
}

/// Run `f` once per rank of a fresh `size`-rank group, each rank on its
/// own thread, and collect the per-rank results in rank order.
pub fn spawn_group<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(ThreadComm) -> R + Send + Sync,
{
    let comms = ThreadComm::group(size);
    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

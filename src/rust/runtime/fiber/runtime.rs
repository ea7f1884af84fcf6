// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Implementation of our single-threaded fiber runtime.
//!
//! Fibers are stored in a slab. Each fiber owns a waker that pushes the fiber's slab index onto a ready channel; a call
//! to [FiberRuntime::poll] drains that channel and polls every fiber found there exactly once.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fiber::waker::{
    FiberWaker,
    ReadyToken,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::slab::Slab;
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    collections::HashSet,
    fmt,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{
        Context,
        Poll,
        Waker,
    },
    time::Duration,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Externally visible fiber identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub struct FiberId {
    index: usize,
    generation: u64,
}

type Coroutine = Pin<Box<dyn Future<Output = ()>>>;

struct Fiber {
    name: String,
    generation: u64,
    waker: Waker,
    // Taken out while the fiber is being polled, so that the fiber may spawn other fibers.
    coroutine: Option<Coroutine>,
}

struct RuntimeInner {
    fibers: RefCell<Slab<Fiber>>,
    next_generation: Cell<u64>,
    ready_tx: Sender<ReadyToken>,
    ready_rx: Receiver<ReadyToken>,
}

/// Cooperative fiber runtime. Cloning yields another handle to the same runtime. A runtime and its fibers stay on the
/// thread that created them; only wakes may come from other threads.
#[derive(Clone)]
pub struct FiberRuntime(Rc<RuntimeInner>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl FiberRuntime {
    pub fn new() -> Self {
        let (ready_tx, ready_rx): (Sender<ReadyToken>, Receiver<ReadyToken>) = ::crossbeam_channel::unbounded();
        Self(Rc::new(RuntimeInner {
            fibers: RefCell::new(Slab::new()),
            next_generation: Cell::new(0),
            ready_tx,
            ready_rx,
        }))
    }

    /// Spawns a fiber. The fiber does not run until the next call to [Self::poll].
    pub fn spawn<F: Future<Output = ()> + 'static>(&self, name: &str, coroutine: F) -> FiberId {
        let generation: u64 = self.0.next_generation.get();
        self.0.next_generation.set(generation + 1);

        let index: usize = {
            let mut fibers = self.0.fibers.borrow_mut();
            let entry = fibers.vacant_entry();
            let index: usize = entry.key();
            entry.insert(Fiber {
                name: name.to_string(),
                generation,
                waker: FiberWaker::new_waker((index, generation), self.0.ready_tx.clone()),
                coroutine: Some(Box::pin(coroutine)),
            });
            index
        };
        trace!("spawn(): name={:?}, index={:?}", name, index);

        let id: FiberId = FiberId { index, generation };
        self.schedule(id);
        id
    }

    /// Polls every fiber that was woken since the last call. Returns how many fibers were polled.
    pub fn poll(&self) -> usize {
        let ready: Vec<ReadyToken> = self.0.ready_rx.try_iter().collect();
        let mut seen: HashSet<ReadyToken> = HashSet::with_capacity(ready.len());
        let mut polled: usize = 0;

        for token in ready {
            if !seen.insert(token) {
                continue;
            }
            let (index, generation): ReadyToken = token;
            let (mut coroutine, waker): (Coroutine, Waker) = {
                let mut fibers = self.0.fibers.borrow_mut();
                match fibers.get_mut(index) {
                    Some(fiber) if fiber.generation == generation => match fiber.coroutine.take() {
                        Some(coroutine) => (coroutine, fiber.waker.clone()),
                        None => continue,
                    },
                    // Stale wake for a fiber that already exited.
                    _ => continue,
                }
            };

            polled += 1;
            let mut context: Context = Context::from_waker(&waker);
            match coroutine.as_mut().poll(&mut context) {
                Poll::Ready(()) => {
                    let fiber: Fiber = self.0.fibers.borrow_mut().remove(index);
                    trace!("poll(): fiber exited (name={:?}, index={:?})", fiber.name, index);
                },
                Poll::Pending => {
                    if let Some(fiber) = self.0.fibers.borrow_mut().get_mut(index) {
                        fiber.coroutine = Some(coroutine);
                    }
                },
            }
        }
        polled
    }

    /// Polls until no fiber is ready. Returns the total number of polls.
    pub fn run_until_stalled(&self) -> usize {
        let mut total: usize = 0;
        loop {
            let polled: usize = self.poll();
            if polled == 0 {
                return total;
            }
            total += polled;
        }
    }

    /// Blocks the calling thread until some fiber is woken or `timeout` elapses. Returns true if a fiber is ready.
    pub fn park(&self, timeout: Duration) -> bool {
        match self.0.ready_rx.recv_timeout(timeout) {
            Ok(token) => {
                // Put the token back for the next poll; we own a sender so this cannot fail.
                self.requeue(token);
                true
            },
            Err(_) => false,
        }
    }

    /// Returns true if some fiber has been woken and not polled yet.
    pub fn has_ready(&self) -> bool {
        !self.0.ready_rx.is_empty()
    }

    /// Number of fibers that have not exited.
    pub fn num_fibers(&self) -> usize {
        self.0.fibers.borrow().len()
    }

    fn schedule(&self, id: FiberId) {
        self.requeue((id.index, id.generation));
    }

    fn requeue(&self, token: ReadyToken) {
        if self.0.ready_tx.send(token).is_err() {
            unreachable!("runtime holds its own ready receiver");
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for FiberRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FiberRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRuntime")
            .field("fibers", &self.num_fibers())
            .field("ready", &self.0.ready_rx.len())
            .finish()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

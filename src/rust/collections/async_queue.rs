// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    collections::VecDeque,
    future::Future,
    ops::Deref,
    pin::Pin,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    task::{
        Context,
        Poll,
        Waker,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct QueueState<T> {
    items: VecDeque<T>,
    waiters: Vec<Waker>,
    /// Set once the final items are in; later pushes are rejected.
    closed: bool,
}

/// This data structure implements an unbounded asynchronous FIFO queue. On pop, if the queue is empty, the calling
/// fiber suspends until an item is pushed. Pushing is legal from any thread; every suspended consumer is woken and the
/// consumers race for the item, so a queue may be drained by one fiber or by many. Closing the queue appends its final
/// items and rejects every later push, under the same lock, so no item can land behind them.
pub struct AsyncQueue<T> {
    state: Mutex<QueueState<T>>,
}

pub struct SharedAsyncQueue<T>(Arc<AsyncQueue<T>>);

/// Future returned by [AsyncQueue::pop].
pub struct Pop<'a, T> {
    queue: &'a AsyncQueue<T>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> AsyncQueue<T> {
    pub fn with_capacity(size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::<T>::with_capacity(size),
                waiters: Vec::<Waker>::new(),
                closed: false,
            }),
        }
    }

    /// Appends `item`, handing it back if the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let waiters: Vec<Waker> = {
            let mut state: MutexGuard<QueueState<T>> = self.state();
            if state.closed {
                return Err(item);
            }
            state.items.push_back(item);
            state.waiters.drain(..).collect()
        };
        Self::wake_all(waiters);
        Ok(())
    }

    /// Appends `last` and closes the queue. Returns false, appending nothing, if it was already closed.
    pub fn close<I: IntoIterator<Item = T>>(&self, last: I) -> bool {
        let waiters: Vec<Waker> = {
            let mut state: MutexGuard<QueueState<T>> = self.state();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.items.extend(last);
            state.waiters.drain(..).collect()
        };
        Self::wake_all(waiters);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Pops the item at the head of the queue, suspending until one is available.
    pub fn pop(&self) -> Pop<'_, T> {
        Pop { queue: self }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.state().items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    fn state(&self) -> MutexGuard<QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_all(waiters: Vec<Waker>) {
        for waker in waiters {
            waker.wake();
        }
    }
}

impl<T> SharedAsyncQueue<T> {
    pub fn new() -> Self {
        Self(Arc::new(AsyncQueue::default()))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<T> Default for SharedAsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SharedAsyncQueue<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for SharedAsyncQueue<T> {
    type Target = AsyncQueue<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a, T> Future for Pop<'a, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, context: &mut Context) -> Poll<Self::Output> {
        let mut state: MutexGuard<QueueState<T>> = self.queue.state();
        match state.items.pop_front() {
            Some(item) => Poll::Ready(item),
            None => {
                let waker: &Waker = context.waker();
                if !state.waiters.iter().any(|w| w.will_wake(waker)) {
                    state.waiters.push(waker.clone());
                }
                Poll::Pending
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

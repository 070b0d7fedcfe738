//! Deferred values – single-assignment cells resolved by the provisioning
//! engine, with lazy projection and combination.
//!
//! A `Deferred<T>` is created unresolved at submission time and reaches
//! exactly one terminal state: resolved with a value, failed with an
//! [`Error`], or cancelled when its [`ResolveHandle`] is dropped. Reads
//! before the terminal transition register a continuation (no polling, no
//! blocked threads); reads after it return the memoized outcome. Projections
//! never run their closure before the source resolves, and never run it at
//! all on a failed or cancelled source – the failure propagates downstream
//! unchanged instead.

#![forbid(unsafe_code)]

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use tether_core::{Error, Result};

type Inner<T> = Shared<BoxFuture<'static, Result<T>>>;

/// A value that an external engine will produce later.
pub struct Deferred<T: Clone> {
    inner: Inner<T>,
}

impl<T: Clone> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Deferred<T> {
    /// An unresolved cell plus the handle that fulfils it. Dropping the
    /// handle without resolving transitions the cell (and everything derived
    /// from it) to the cancelled state.
    pub fn pending() -> (ResolveHandle<T>, Deferred<T>) {
        let (tx, rx) = oneshot::channel::<Result<T>>();
        let inner = async move {
            match rx.await {
                Ok(res) => res,
                Err(oneshot::Canceled) => Err(Error::Cancelled),
            }
        }
        .boxed()
        .shared();
        (ResolveHandle { tx }, Deferred { inner })
    }

    /// Already-resolved value (e.g. an output that does not depend on any
    /// engine-produced state).
    pub fn ready(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// Already-failed value.
    pub fn failed(err: Error) -> Self {
        Self::settled(Err(err))
    }

    fn settled(res: Result<T>) -> Self {
        Deferred {
            inner: async move { res }.boxed().shared(),
        }
    }

    /// Lazily apply `f` once the source resolves. Composes:
    /// `d.project(f).project(g)` resolves to the same value as
    /// `d.project(|v| g(f(v)))`.
    pub fn project<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let src = self.inner.clone();
        Deferred {
            inner: async move { src.await.map(f) }.boxed().shared(),
        }
    }

    /// Like [`project`](Self::project) but the closure may signal a data
    /// error, which becomes the derived cell's terminal failure.
    pub fn try_project<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let src = self.inner.clone();
        Deferred {
            inner: async move { src.await.and_then(f) }.boxed().shared(),
        }
    }

    /// Recombine two deferred values. `self` is awaited before `other`, so
    /// when both fail the failure earlier on the critical path wins.
    pub fn combine<U, V, F>(&self, other: &Deferred<U>, f: F) -> Deferred<V>
    where
        U: Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: FnOnce(T, U) -> V + Send + 'static,
    {
        let a = self.inner.clone();
        let b = other.inner.clone();
        Deferred {
            inner: async move {
                let va = a.await?;
                let vb = b.await?;
                Ok(f(va, vb))
            }
            .boxed()
            .shared(),
        }
    }

    /// Wait for the terminal state. Every caller observes the same memoized
    /// outcome.
    pub async fn wait(&self) -> Result<T> {
        self.inner.clone().await
    }

    /// Non-blocking probe: `None` while pending, the terminal outcome once
    /// settled.
    pub fn try_resolved(&self) -> Option<Result<T>> {
        self.inner.clone().now_or_never()
    }
}

/// Write end of a pending [`Deferred`]. Consuming methods make the
/// exactly-once terminal transition a type-level guarantee.
pub struct ResolveHandle<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> ResolveHandle<T> {
    pub fn resolve(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    pub fn fail(self, err: Error) {
        debug!(error = %err, "deferred failed");
        let _ = self.tx.send(Err(err));
    }

    /// Explicit cancellation; equivalent to dropping the handle.
    pub fn cancel(self) {
        drop(self.tx);
    }

    pub fn complete(self, res: Result<T>) {
        match res {
            Ok(v) => self.resolve(v),
            Err(e) => self.fail(e),
        }
    }
}

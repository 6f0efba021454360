//! Hierarchical lifecycle scopes.
//!
//! Every listener, connection, stream worker and background service hangs off a [`Scope`].
//! Closing a scope:
//!
//! ```text
//! close()
//!   ├─ fire `closing`            (children and tasks observe cancellation)
//!   ├─ run teardown               (at most once, error retained)
//!   ├─ close children, join tasks (repeated until none are left)
//!   └─ fire `closed`
//! ```
//!
//! Descendants therefore always report `closed` before their parent does. Calling `close`
//! again waits for the first call and returns the same result.
//!
//! A task spawned on a scope must not await that scope's `close`, since the close waits
//! for the task. Use [`Scope::spawn_close`] from inside such tasks.

use crate::error::ScopeError;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Boxed, sendable future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type Teardown = Box<dyn FnOnce() -> BoxFuture<Result<(), ScopeError>> + Send>;

/// One-shot broadcast flag.
///
/// Also resolves if every handle to the owning scope has been dropped.
#[derive(Clone)]
pub struct Signal {
    rx: watch::Receiver<bool>,
}

impl Signal {
    /// Whether the signal has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the signal.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// Firing side of a standalone [`Signal`].
#[derive(Debug)]
pub struct Trigger {
    tx: watch::Sender<bool>,
}

impl Trigger {
    /// Create an unfired trigger.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A signal that resolves once [`Trigger::fire`] is called.
    #[must_use]
    pub fn signal(&self) -> Signal {
        Signal {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the signal. Later calls do nothing.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the trigger has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct ScopeState {
    started: bool,
    teardown: Option<Teardown>,
    children: Vec<Scope>,
    tasks: Vec<JoinHandle<()>>,
}

struct ScopeInner {
    name: Cow<'static, str>,
    closing: watch::Sender<bool>,
    closed: watch::Sender<bool>,
    state: Mutex<ScopeState>,
    result: OnceLock<Result<(), ScopeError>>,
}

/// A cancellable lifecycle node. Cloning yields another handle to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

enum CloseStart {
    Fresh(Option<Teardown>),
    AlreadyStarted,
}

impl Scope {
    // ═══════════════════════════════════════════════════════════════════════
    // Constructors
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a root scope with no teardown.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        let (closing, _) = watch::channel(false);
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(ScopeInner {
                name: name.into(),
                closing,
                closed,
                state: Mutex::new(ScopeState::default()),
                result: OnceLock::new(),
            }),
        }
    }

    /// Create a root scope that runs `teardown` once it starts closing, before its
    /// children are waited for.
    pub fn with_teardown<F, Fut>(name: impl Into<Cow<'static, str>>, teardown: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ScopeError>> + Send + 'static,
    {
        let scope = Self::new(name);
        let teardown: Teardown =
            Box::new(move || -> BoxFuture<Result<(), ScopeError>> { Box::pin(teardown()) });
        scope.state().teardown = Some(teardown);
        scope
    }

    /// Create a scope registered as a child of `self`.
    pub fn child(&self, name: impl Into<Cow<'static, str>>) -> Scope {
        let child = Scope::new(name);
        self.add_child_scope(child.clone());
        child
    }

    /// Create a child scope with a teardown.
    pub fn child_with_teardown<F, Fut>(&self, name: impl Into<Cow<'static, str>>, teardown: F) -> Scope
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ScopeError>> + Send + 'static,
    {
        let child = Scope::with_teardown(name, teardown);
        self.add_child_scope(child.clone());
        child
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Children
    // ═══════════════════════════════════════════════════════════════════════

    /// Register an existing scope as a child.
    ///
    /// If `self` is already closing the child is closed right away.
    pub fn add_child_scope(&self, child: Scope) {
        let mut state = self.state();
        if state.started {
            drop(state);
            child.spawn_close();
            return;
        }
        state.children.retain(|c| !c.is_closed());
        state.children.push(child);
    }

    /// Run `f(scope)` as a task owned by this scope.
    ///
    /// The scope does not report `closed` until the task returns; the task is expected to
    /// watch [`Scope::closing`] and wind down when it fires.
    pub fn spawn<F, Fut>(&self, f: F)
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(f(self.clone()));
        let mut state = self.state();
        state.tasks.retain(|t| !t.is_finished());
        state.tasks.push(handle);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Close the scope and everything beneath it.
    ///
    /// Runs teardown at most once. Every call returns the teardown's result.
    ///
    /// # Errors
    ///
    /// Returns the error produced by this scope's teardown, if any.
    pub fn close(&self) -> BoxFuture<Result<(), ScopeError>> {
        let scope = self.clone();
        Box::pin(async move { scope.run_close().await })
    }

    async fn run_close(&self) -> Result<(), ScopeError> {
        let start = {
            let mut state = self.state();
            if state.started {
                CloseStart::AlreadyStarted
            } else {
                state.started = true;
                CloseStart::Fresh(state.teardown.take())
            }
        };

        let teardown = match start {
            CloseStart::AlreadyStarted => {
                self.closed().wait().await;
                return self.stored_result();
            }
            CloseStart::Fresh(teardown) => teardown,
        };

        self.inner.closing.send_replace(true);
        tracing::trace!(scope = %self.inner.name, "scope closing");

        let result = match teardown {
            Some(teardown) => teardown().await,
            None => Ok(()),
        };
        if let Err(e) = &result {
            tracing::debug!(scope = %self.inner.name, "scope teardown failed: {}", e);
        }

        loop {
            let (children, tasks) = {
                let mut state = self.state();
                (
                    std::mem::take(&mut state.children),
                    std::mem::take(&mut state.tasks),
                )
            };
            if children.is_empty() && tasks.is_empty() {
                break;
            }

            let closers: Vec<JoinHandle<()>> = children
                .into_iter()
                .map(|child| {
                    tokio::spawn(async move {
                        let _ = child.close().await;
                    })
                })
                .collect();
            for handle in closers.into_iter().chain(tasks) {
                if let Err(e) = handle.await {
                    tracing::warn!(scope = %self.inner.name, "scope task ended abnormally: {}", e);
                }
            }
        }

        let _ = self.inner.result.set(result.clone());
        self.inner.closed.send_replace(true);
        tracing::trace!(scope = %self.inner.name, "scope closed");
        result
    }

    /// Start closing in a background task and return immediately.
    pub fn spawn_close(&self) {
        let scope = self.clone();
        tokio::spawn(async move {
            let _ = scope.close().await;
        });
    }

    /// Close the scope once `timeout` elapses, unless it closes first.
    pub fn close_after(&self, timeout: Duration) {
        let scope = self.clone();
        tokio::spawn(async move {
            let closing = scope.closing();
            tokio::select! {
                () = tokio::time::sleep(timeout) => {
                    let _ = scope.close().await;
                }
                () = closing.wait() => {}
            }
        });
    }

    /// Fires when closing starts.
    #[must_use]
    pub fn closing(&self) -> Signal {
        Signal {
            rx: self.inner.closing.subscribe(),
        }
    }

    /// Fires when closing has finished.
    #[must_use]
    pub fn closed(&self) -> Signal {
        Signal {
            rx: self.inner.closed.subscribe(),
        }
    }

    /// Whether closing has started.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        *self.inner.closing.borrow()
    }

    /// Whether closing has finished.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Scope name, for logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn stored_result(&self) -> Result<(), ScopeError> {
        self.inner.result.get().cloned().unwrap_or(Ok(()))
    }

    fn state(&self) -> MutexGuard<'_, ScopeState> {
        // A panic while holding the lock leaves the state consistent; keep going.
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.inner.name)
            .field("closing", &self.is_closing())
            .field("closed", &self.is_closed())
            .finish()
    }
}

//! Scoped blocking tasks that share one cancellation scope.
//!
//! Units run on the blocking thread pool. A unit that fails or panics cancels
//! the scope so its siblings abort at their next check. Joining waits for every
//! unit, even after a failure or an elapsed deadline.

use docshell_core::{CancelCause, CancelScope};
use std::fmt::Display;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How a unit of work ended when it did not produce a value.
#[derive(Debug)]
pub enum UnitError<E> {
    /// The unit returned an error.
    Failed(E),
    /// The unit panicked or was torn down by the runtime.
    Aborted(String),
}

pub type UnitResult<T, E> = Result<T, UnitError<E>>;

/// Handle to a unit spawned in a [`TaskScope`].
pub struct ScopedTask<T, E> {
    unit: &'static str,
    handle: JoinHandle<Result<T, E>>,
}

/// Owner of a cancellation scope and the units running under it.
///
/// Dropping the scope before [`TaskScope::join2`] completes cancels it, so
/// units abandoned by a dropped caller still unwind their writes.
pub struct TaskScope {
    scope: CancelScope,
    joined: bool,
}

impl TaskScope {
    pub fn new(deadline: Option<Instant>) -> Self {
        Self {
            scope: CancelScope::with_deadline(deadline),
            joined: false,
        }
    }

    pub fn scope(&self) -> &CancelScope {
        &self.scope
    }

    /// Run `f` on the blocking pool with a clone of the scope.
    pub fn spawn<T, E, F>(&self, unit: &'static str, f: F) -> ScopedTask<T, E>
    where
        F: FnOnce(CancelScope) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let scope = self.scope.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let result = f(scope.clone());
            if let Err(e) = &result {
                let cause = CancelCause::SiblingFailed {
                    unit: unit.to_string(),
                    reason: e.to_string(),
                };
                if scope.cancel(cause) {
                    debug!("Unit '{}' failed first, scope cancelled: {}", unit, e);
                }
            }
            result
        });

        ScopedTask { unit, handle }
    }

    /// Wait for both units. If the deadline elapses first, the scope is
    /// cancelled and the wait continues until both have reported.
    pub async fn join2<A, EA, B, EB>(
        &mut self,
        a: ScopedTask<A, EA>,
        b: ScopedTask<B, EB>,
    ) -> (UnitResult<A, EA>, UnitResult<B, EB>) {
        let scope = self.scope.clone();
        let both = async { tokio::join!(settle(&scope, a), settle(&scope, b)) };
        tokio::pin!(both);

        let results = match scope.deadline() {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    results = &mut both => results,
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                        if scope.cancel(CancelCause::DeadlineExceeded) {
                            warn!("Deadline exceeded, cancelling in-flight units");
                        }
                        both.await
                    }
                }
            }
            None => both.await,
        };

        self.joined = true;
        results
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        if !self.joined
            && self
                .scope
                .cancel(CancelCause::Requested("task scope dropped".to_string()))
        {
            debug!("Task scope dropped before join, units cancelled");
        }
    }
}

async fn settle<T, E>(scope: &CancelScope, task: ScopedTask<T, E>) -> UnitResult<T, E> {
    match task.handle.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(UnitError::Failed(e)),
        Err(join_err) => {
            let message = join_err.to_string();
            scope.cancel(CancelCause::SiblingFailed {
                unit: task.unit.to_string(),
                reason: message.clone(),
            });
            warn!("Unit '{}' aborted: {}", task.unit, message);
            Err(UnitError::Aborted(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_waits_for_both() {
        let mut tasks = TaskScope::new(None);
        let a = tasks.spawn("a", |_| Ok::<_, String>(1));
        let b = tasks.spawn("b", |_| {
            std::thread::sleep(Duration::from_millis(50));
            Ok::<_, String>("done")
        });

        let (ra, rb) = tasks.join2(a, b).await;
        assert_eq!(ra.unwrap(), 1);
        assert_eq!(rb.unwrap(), "done");
        assert!(!tasks.scope().is_cancelled());
    }

    #[tokio::test]
    async fn test_failure_cancels_sibling() {
        let mut tasks = TaskScope::new(None);
        let failing = tasks.spawn("failing", |_| Err::<(), _>("boom".to_string()));
        let waiting = tasks.spawn("waiting", |scope: CancelScope| {
            for _ in 0..500 {
                if let Err(cause) = scope.check() {
                    return Err(cause.to_string());
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Ok(())
        });

        let (rf, rw) = tasks.join2(failing, waiting).await;
        assert!(matches!(rf, Err(UnitError::Failed(ref e)) if e == "boom"));
        assert!(matches!(rw, Err(UnitError::Failed(ref e)) if e.contains("boom")));
        assert_eq!(
            tasks.scope().cause(),
            Some(CancelCause::SiblingFailed {
                unit: "failing".to_string(),
                reason: "boom".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_deadline_cancels_and_still_joins() {
        let mut tasks = TaskScope::new(Instant::now().checked_add(Duration::from_millis(20)));
        let slow = |scope: CancelScope| {
            for _ in 0..500 {
                scope.check().map_err(|c| c.to_string())?;
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok::<_, String>(())
        };
        let a = tasks.spawn("a", slow);
        let b = tasks.spawn("b", slow);

        let (ra, rb) = tasks.join2(a, b).await;
        assert!(ra.is_err());
        assert!(rb.is_err());
        assert_eq!(tasks.scope().cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_panic_is_aborted() {
        let mut tasks = TaskScope::new(None);
        let a = tasks.spawn("panicky", |_| -> Result<(), String> { panic!("unit panicked") });
        let b = tasks.spawn("fine", |_| Ok::<_, String>(()));

        let (ra, rb) = tasks.join2(a, b).await;
        assert!(matches!(ra, Err(UnitError::Aborted(_))));
        assert!(rb.is_ok());
        assert!(tasks.scope().is_cancelled());
    }

    #[tokio::test]
    async fn test_drop_before_join_cancels() {
        let tasks = TaskScope::new(None);
        let scope = tasks.scope().clone();
        drop(tasks);
        assert!(matches!(scope.cause(), Some(CancelCause::Requested(_))));
    }
}

//! Run-all, collect-first-error fan-out.
//!
//! Every phase of the pipeline has the same shape: `N` independent units of
//! work, all started at once, all awaited. [`run_all`] spawns one tokio task
//! per item and drains them in completion order. A failing task never
//! cancels its siblings; the first error seen while draining is returned
//! once the last task has finished.

use std::future::Future;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};

/// Run `task` on every item concurrently and wait for all of them.
///
/// Returns `Ok(())` only if every task succeeded. Otherwise returns the
/// first error in completion order, after all tasks are done. A panicking
/// task is reported through `E: From<JoinError>`.
pub async fn run_all<T, F, Fut, E>(items: impl IntoIterator<Item = T>, task: F) -> Result<(), E>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: From<JoinError> + Send + 'static,
{
    let task = Arc::new(task);
    let mut set = JoinSet::new();
    for item in items {
        let task = Arc::clone(&task);
        set.spawn(async move { task(item).await });
    }

    let mut first_err = None;
    while let Some(joined) = set.join_next().await {
        let outcome = joined.map_err(E::from).and_then(|r| r);
        if let Err(e) = outcome {
            first_err.get_or_insert(e);
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Failed(usize),
        Panicked,
    }

    impl From<JoinError> for TestError {
        fn from(_: JoinError) -> Self {
            TestError::Panicked
        }
    }

    #[tokio::test]
    async fn all_succeed() {
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        let result: Result<(), TestError> = run_all(0..10, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert_eq!(result, Ok(()));
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn failure_waits_for_every_sibling() {
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        let result = run_all(0..6usize, move |i| {
            let counter = Arc::clone(&counter);
            async move {
                if i == 0 {
                    return Err(TestError::Failed(i));
                }
                tokio::time::sleep(Duration::from_millis(20 * i as u64)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(result, Err(TestError::Failed(0)));
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn first_error_is_by_completion_order() {
        let result = run_all([1usize, 2], |i| async move {
            let delay = if i == 1 { 50 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Err(TestError::Failed(i))
        })
        .await;
        assert_eq!(result, Err(TestError::Failed(2)));
    }

    #[tokio::test]
    async fn panic_becomes_an_error() {
        let result: Result<(), TestError> = run_all([0usize, 1], |i| async move {
            if i == 0 {
                panic!("boom");
            }
            Ok(())
        })
        .await;
        assert_eq!(result, Err(TestError::Panicked));
    }

    #[tokio::test]
    async fn empty_input_is_ok() {
        let result: Result<(), TestError> = run_all(Vec::<u8>::new(), |_| async { Ok(()) }).await;
        assert_eq!(result, Ok(()));
    }
}

//! Shutdown queue drainer (spec §4.10): polls an arbitrary stats source
//! until a caller-supplied predicate says the queue is empty, or a
//! timeout elapses. Async-loop shape grounded on the teacher's
//! `ShutdownWatcher::check_shutdown` poll/select pattern.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

pub type StatsFuture<S> = Pin<Box<dyn Future<Output = S> + Send>>;

/// `true` once `is_queue_empty(get_stats())`; `false` if `timeout` elapses
/// first. `on_progress` fires on every poll where the queue is still
/// non-empty, and never after it drains.
pub async fn wait_for_queue_to_drain<S, GetStats, IsEmpty, OnProgress>(
  queue_name: &str,
  mut get_stats: GetStats,
  is_queue_empty: IsEmpty,
  timeout: Option<Duration>,
  poll_interval: Duration,
  mut on_progress: Option<OnProgress>,
) -> bool
where
  GetStats: FnMut() -> StatsFuture<S>,
  IsEmpty: Fn(&S) -> bool,
  OnProgress: FnMut(&S, Duration),
{
  let start = Instant::now();

  let stats = get_stats().await;
  if is_queue_empty(&stats) {
    debug!(queue_name, "queue already drained");
    return true;
  }

  loop {
    let elapsed = start.elapsed();
    if let Some(timeout) = timeout
      && elapsed >= timeout
    {
      info!(queue_name, elapsed_ms = elapsed.as_millis(), "queue drain timed out");
      return false;
    }

    tokio::time::sleep(poll_interval).await;

    let stats = get_stats().await;
    if is_queue_empty(&stats) {
      info!(queue_name, elapsed_ms = start.elapsed().as_millis(), "queue drained");
      return true;
    }

    if let Some(on_progress) = on_progress.as_mut() {
      on_progress(&stats, start.elapsed());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn boxed<S: 'static + Send>(value: S) -> StatsFuture<S> {
    Box::pin(async move { value })
  }

  #[tokio::test]
  async fn returns_true_immediately_when_already_empty() {
    let drained = wait_for_queue_to_drain(
      "embed",
      || boxed(0usize),
      |depth: &usize| *depth == 0,
      Some(Duration::from_millis(100)),
      Duration::from_millis(5),
      None::<fn(&usize, Duration)>,
    )
    .await;
    assert!(drained);
  }

  #[tokio::test(start_paused = true)]
  async fn polls_until_empty_and_never_calls_on_progress_after() {
    let calls_made = Arc::new(AtomicUsize::new(0));
    let progress_calls = Arc::new(AtomicUsize::new(0));
    let progress_calls_clone = progress_calls.clone();

    let counter = calls_made.clone();
    let task = tokio::spawn(async move {
      wait_for_queue_to_drain(
        "embed",
        move || {
          let made = counter.fetch_add(1, Ordering::SeqCst);
          boxed(3usize.saturating_sub(made))
        },
        |depth: &usize| *depth == 0,
        Some(Duration::from_secs(10)),
        Duration::from_millis(10),
        Some(move |depth: &usize, _elapsed: Duration| {
          assert!(*depth > 0);
          progress_calls_clone.fetch_add(1, Ordering::SeqCst);
        }),
      )
      .await
    });

    tokio::time::advance(Duration::from_millis(50)).await;
    let drained = task.await.unwrap();
    assert!(drained);
    assert!(progress_calls.load(Ordering::SeqCst) >= 1);
  }

  #[tokio::test(start_paused = true)]
  async fn times_out_when_queue_never_drains() {
    let task = tokio::spawn(async move {
      wait_for_queue_to_drain(
        "embed",
        || boxed(5usize),
        |depth: &usize| *depth == 0,
        Some(Duration::from_millis(30)),
        Duration::from_millis(10),
        None::<fn(&usize, Duration)>,
      )
      .await
    });

    tokio::time::advance(Duration::from_millis(100)).await;
    let drained = task.await.unwrap();
    assert!(!drained);
  }
}

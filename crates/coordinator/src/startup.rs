//! Startup coordinator state machine (spec §4.9). Grounded on the
//! teacher's `shutdown_watcher.rs`: a `tokio::select!` loop racing a
//! timer against an event source, structured tracing around state
//! transitions.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use indexcore::{StageProgress, StartupStage};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::CoordinatorError;

fn stage_timeout(stage: StartupStage) -> Option<Duration> {
  match stage {
    StartupStage::WorkerSpawn => Some(Duration::from_secs(5)),
    StartupStage::ModelDownload => Some(Duration::from_secs(300)),
    StartupStage::DbInit => Some(Duration::from_secs(10)),
    StartupStage::DbLoad => Some(Duration::from_secs(30)),
    StartupStage::Ready => None,
  }
}

#[derive(Debug, Clone)]
pub struct StartupError {
  pub kind: &'static str,
  pub stage: StartupStage,
  pub message: String,
}

/// Callbacks driven by the coordinator. Synchronous: `show_window` in
/// particular must run before the coordinator's first await point.
pub trait StartupHooks: Send + Sync {
  fn show_window(&self);
  fn notify_stage_progress(&self, progress: &StageProgress);
  fn notify_error(&self, error: &StartupError);
  fn notify_files_loaded(&self);
  fn notify_ready(&self);
}

/// External handle used to feed stage progress into a running coordinator
/// and to dispose of it early.
#[derive(Clone)]
pub struct StartupHandle {
  progress_tx: mpsc::Sender<StageProgress>,
  dispose_tx: std::sync::Arc<StdMutex<Option<oneshot::Sender<()>>>>,
}

impl StartupHandle {
  pub async fn notify_progress(&self, progress: StageProgress) {
    let _ = self.progress_tx.send(progress).await;
  }

  /// Clears the running timeout, unsubscribes, and causes the in-flight
  /// `coordinate()` to resolve with `CoordinatorError::Disposed`.
  pub fn dispose(&self) {
    if let Some(tx) = self.dispose_tx.lock().expect("dispose mutex poisoned").take() {
      let _ = tx.send(());
    }
  }
}

/// Single-shot state machine driver. Construct a fresh instance per
/// startup attempt.
pub struct StartupCoordinator<H: StartupHooks> {
  hooks: H,
  progress_rx: mpsc::Receiver<StageProgress>,
  dispose_rx: oneshot::Receiver<()>,
}

impl<H: StartupHooks> StartupCoordinator<H> {
  pub fn new(hooks: H) -> (Self, StartupHandle) {
    let (progress_tx, progress_rx) = mpsc::channel(32);
    let (dispose_tx, dispose_rx) = oneshot::channel();
    let handle = StartupHandle {
      progress_tx,
      dispose_tx: std::sync::Arc::new(StdMutex::new(Some(dispose_tx))),
    };
    (
      Self {
        hooks,
        progress_rx,
        dispose_rx,
      },
      handle,
    )
  }

  /// Drives the state machine to completion: `Ok(())` once `Ready` is
  /// observed, `Err(Disposed)` if `dispose()` is called first.
  pub async fn coordinate(mut self) -> Result<(), CoordinatorError> {
    self.hooks.show_window();

    let mut current_stage = StartupStage::WorkerSpawn;
    let mut deadline = far_deadline(stage_timeout(current_stage));

    loop {
      tokio::select! {
        biased;

        _ = &mut self.dispose_rx => {
          info!("startup coordinator disposed");
          return Err(CoordinatorError::Disposed);
        }

        maybe_progress = self.progress_rx.recv() => {
          let Some(progress) = maybe_progress else {
            warn!("startup progress channel closed before reaching ready");
            return Err(CoordinatorError::Disposed);
          };

          self.hooks.notify_stage_progress(&progress);
          current_stage = progress.stage;
          deadline = far_deadline(stage_timeout(current_stage));

          if current_stage == StartupStage::Ready {
            self.hooks.notify_files_loaded();
            self.hooks.notify_ready();
            return Ok(());
          }
        }

        _ = tokio::time::sleep_until(deadline) => {
          let err = StartupError {
            kind: "stage-timeout",
            stage: current_stage,
            message: format!("stage {current_stage:?} timed out"),
          };
          error!(stage = ?current_stage, "startup stage timed out");
          self.hooks.notify_error(&err);
          // Not terminal: keep waiting under the same stage's budget.
          deadline = far_deadline(stage_timeout(current_stage));
        }
      }
    }
  }
}

fn far_deadline(timeout: Option<Duration>) -> Instant {
  match timeout {
    Some(d) => Instant::now() + d,
    None => Instant::now() + Duration::from_secs(60 * 60 * 24 * 365),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::Mutex;

  #[derive(Default, Clone)]
  struct RecordingHooks {
    events: Arc<Mutex<Vec<String>>>,
  }

  impl StartupHooks for RecordingHooks {
    fn show_window(&self) {
      self.events.lock().unwrap().push("show_window".to_string());
    }
    fn notify_stage_progress(&self, progress: &StageProgress) {
      self.events.lock().unwrap().push(format!("progress:{:?}", progress.stage));
    }
    fn notify_error(&self, error: &StartupError) {
      self.events.lock().unwrap().push(format!("error:{:?}", error.stage));
    }
    fn notify_files_loaded(&self) {
      self.events.lock().unwrap().push("files_loaded".to_string());
    }
    fn notify_ready(&self) {
      self.events.lock().unwrap().push("ready".to_string());
    }
  }

  fn progress(stage: StartupStage) -> StageProgress {
    StageProgress {
      stage,
      message: String::new(),
      progress: None,
    }
  }

  #[tokio::test]
  async fn happy_path_reaches_ready_and_fires_hooks_in_order() {
    let hooks = RecordingHooks::default();
    let events = hooks.events.clone();
    let (coordinator, handle) = StartupCoordinator::new(hooks);

    let task = tokio::spawn(coordinator.coordinate());
    handle.notify_progress(progress(StartupStage::WorkerSpawn)).await;
    handle.notify_progress(progress(StartupStage::DbInit)).await;
    handle.notify_progress(progress(StartupStage::DbLoad)).await;
    handle.notify_progress(progress(StartupStage::Ready)).await;

    let result = task.await.unwrap();
    assert!(result.is_ok());

    let events = events.lock().unwrap().clone();
    assert_eq!(events[0], "show_window");
    assert_eq!(events.last().unwrap(), "ready");
    assert_eq!(events[events.len() - 2], "files_loaded");
  }

  #[tokio::test]
  async fn dispose_rejects_the_outstanding_coordinate_call() {
    let hooks = RecordingHooks::default();
    let (coordinator, handle) = StartupCoordinator::new(hooks);

    let task = tokio::spawn(coordinator.coordinate());
    handle.dispose();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(CoordinatorError::Disposed)));
  }

  #[tokio::test(start_paused = true)]
  async fn stage_timeout_fires_notify_error_and_keeps_waiting() {
    let hooks = RecordingHooks::default();
    let events = hooks.events.clone();
    let (coordinator, handle) = StartupCoordinator::new(hooks);

    let task = tokio::spawn(coordinator.coordinate());
    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;

    handle.notify_progress(progress(StartupStage::Ready)).await;
    let result = task.await.unwrap();
    assert!(result.is_ok());

    assert!(events.lock().unwrap().iter().any(|e| e == "error:WorkerSpawn"));
  }
}

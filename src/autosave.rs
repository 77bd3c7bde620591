//! Autosave for the flow editor.
//!
//! An explicit state machine (`Clean | Dirty | Saving | Error`) with a pure
//! transition function, driven by a poll-based loop that owns the saver
//! closure. Edits arm a debounce timer (reset on every further edit); the
//! timer firing starts a save; edits arriving while a save is in flight set
//! a follow-up flag so the next cycle captures them once the save resolves,
//! whatever its outcome. A save in flight is never re-triggered by the same
//! debounce cycle, and a failed save is only retried by a new edit or a
//! manual save.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(3000);

/// The autosave state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveState {
  /// No pending edits
  Clean,
  /// Edits since last save; the debounce timer is armed
  Dirty { deadline: Instant },
  /// A save request is in flight; `dirty_again` records edits that arrived
  /// during the flight
  Saving { dirty_again: bool },
  /// The last save attempt failed; edits are retained locally
  Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveEvent {
  Edit,
  TimerFired,
  ManualSave,
  SaveSucceeded,
  SaveFailed,
}

impl AutosaveState {
  /// Apply one event. Invalid combinations leave the state unchanged, so the
  /// driver cannot double-start a save.
  pub fn apply(self, event: AutosaveEvent, now: Instant, debounce: Duration) -> AutosaveState {
    use AutosaveEvent::*;
    use AutosaveState::*;

    match (self, event) {
      // Edits arm or re-arm the debounce timer (debounce, not throttle).
      (Clean | Dirty { .. } | Error, Edit) => Dirty {
        deadline: now + debounce,
      },
      // Edits during a flight are not dropped; they mark a follow-up cycle.
      (Saving { .. }, Edit) => Saving { dirty_again: true },

      (Dirty { deadline }, TimerFired) if now >= deadline => Saving { dirty_again: false },

      // Manual save bypasses the timer but a flight is never doubled.
      (Clean | Dirty { .. } | Error, ManualSave) => Saving { dirty_again: false },

      (Saving { dirty_again: false }, SaveSucceeded) => Clean,
      (Saving { dirty_again: false }, SaveFailed) => Error,
      // Follow-up edits re-enter Dirty regardless of the flight's outcome.
      (Saving { dirty_again: true }, SaveSucceeded | SaveFailed) => Dirty {
        deadline: now + debounce,
      },

      (state, _) => state,
    }
  }
}

/// Snapshot of the loop for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveStatus {
  pub has_unsaved_changes: bool,
  pub is_saving: bool,
  pub last_saved: Option<DateTime<Utc>>,
}

type BoxFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type SaverFn = Box<dyn Fn() -> BoxFuture + Send + Sync>;

/// Poll-driven autosave loop.
///
/// Call [`record_edit`](Self::record_edit) on every local change and
/// [`poll`](Self::poll) from the tick loop; `poll` fires due timers and
/// consumes save completions.
pub struct AutosaveLoop {
  state: AutosaveState,
  saver: SaverFn,
  receiver: Option<mpsc::UnboundedReceiver<Result<(), String>>>,
  last_saved: Option<DateTime<Utc>>,
  last_error: Option<String>,
  debounce: Duration,
}

impl AutosaveLoop {
  pub fn new<F, Fut>(saver: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
  {
    Self {
      state: AutosaveState::Clean,
      saver: Box::new(move || Box::pin(saver())),
      receiver: None,
      last_saved: None,
      last_error: None,
      debounce: DEFAULT_DEBOUNCE,
    }
  }

  /// Set the quiet period after the last edit before a save is issued.
  pub fn with_debounce(mut self, debounce: Duration) -> Self {
    self.debounce = debounce;
    self
  }

  pub fn state(&self) -> AutosaveState {
    self.state
  }

  pub fn status(&self) -> AutosaveStatus {
    AutosaveStatus {
      has_unsaved_changes: !matches!(self.state, AutosaveState::Clean),
      is_saving: matches!(self.state, AutosaveState::Saving { .. }),
      last_saved: self.last_saved,
    }
  }

  /// Message of the last failed save, cleared by the next success.
  pub fn last_error(&self) -> Option<&str> {
    self.last_error.as_deref()
  }

  /// Note a local edit.
  pub fn record_edit(&mut self) {
    self.state = self
      .state
      .apply(AutosaveEvent::Edit, Instant::now(), self.debounce);
  }

  /// Explicit user save: starts immediately unless a save is already in
  /// flight, in which case it is ignored (not queued).
  pub fn save_now(&mut self) -> bool {
    if matches!(self.state, AutosaveState::Saving { .. }) {
      return false;
    }
    self.state =
      self
        .state
        .apply(AutosaveEvent::ManualSave, Instant::now(), self.debounce);
    self.start_save();
    true
  }

  /// Fire a due timer and consume a finished save, if any.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    let now = Instant::now();

    if let AutosaveState::Dirty { deadline } = self.state {
      if now >= deadline {
        self.state = self.state.apply(AutosaveEvent::TimerFired, now, self.debounce);
        self.start_save();
        changed = true;
      }
    }

    if let Some(receiver) = &mut self.receiver {
      match receiver.try_recv() {
        Ok(result) => {
          let event = match result {
            Ok(()) => {
              self.last_saved = Some(Utc::now());
              self.last_error = None;
              AutosaveEvent::SaveSucceeded
            }
            Err(message) => {
              debug!("autosave failed: {}", message);
              self.last_error = Some(message);
              AutosaveEvent::SaveFailed
            }
          };
          self.state = self.state.apply(event, Instant::now(), self.debounce);
          self.receiver = None;
          changed = true;
        }
        Err(mpsc::error::TryRecvError::Empty) => {}
        Err(mpsc::error::TryRecvError::Disconnected) => {
          self.last_error = Some("save task ended without a result".to_string());
          self.state =
            self
              .state
              .apply(AutosaveEvent::SaveFailed, Instant::now(), self.debounce);
          self.receiver = None;
          changed = true;
        }
      }
    }

    changed
  }

  /// Disarm the debounce timer and detach from any in-flight save.
  ///
  /// Required on teardown so a stale timer cannot issue a save against state
  /// that no longer exists.
  pub fn cancel(&mut self) {
    self.receiver = None;
    self.state = AutosaveState::Clean;
  }

  fn start_save(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);

    let future = (self.saver)();
    tokio::spawn(async move {
      // Ignore send errors - the loop may have been cancelled
      let _ = tx.send(future.await);
    });
  }
}

impl std::fmt::Debug for AutosaveLoop {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AutosaveLoop")
      .field("state", &self.state)
      .field("last_saved", &self.last_saved)
      .field("debounce", &self.debounce)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  const DEBOUNCE: Duration = Duration::from_millis(60);

  fn counting_loop(counter: Arc<AtomicU32>) -> AutosaveLoop {
    AutosaveLoop::new(move || {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    })
    .with_debounce(DEBOUNCE)
  }

  /// Poll every few milliseconds for the given span.
  async fn drive(autosave: &mut AutosaveLoop, span: Duration) {
    let deadline = Instant::now() + span;
    while Instant::now() < deadline {
      autosave.poll();
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  }

  #[test]
  fn test_transitions_cover_the_state_machine() {
    use AutosaveEvent::*;
    use AutosaveState::*;

    let now = Instant::now();
    let debounce = Duration::from_secs(3);

    assert!(matches!(Clean.apply(Edit, now, debounce), Dirty { .. }));
    assert!(matches!(Error.apply(Edit, now, debounce), Dirty { .. }));

    // A second edit re-arms the timer.
    let armed = Clean.apply(Edit, now, debounce);
    let later = now + Duration::from_secs(1);
    assert_eq!(
      armed.apply(Edit, later, debounce),
      Dirty { deadline: later + debounce }
    );

    // The timer only fires once due.
    let due = Dirty { deadline: now };
    assert_eq!(due.apply(TimerFired, now, debounce), Saving { dirty_again: false });
    let not_due = Dirty { deadline: now + debounce };
    assert_eq!(not_due.apply(TimerFired, now, debounce), not_due);

    // Edits during a flight are retained, not re-triggering.
    let saving = Saving { dirty_again: false };
    assert_eq!(saving.apply(Edit, now, debounce), Saving { dirty_again: true });
    assert_eq!(saving.apply(TimerFired, now, debounce), saving);
    assert_eq!(saving.apply(ManualSave, now, debounce), saving);

    assert_eq!(saving.apply(SaveSucceeded, now, debounce), Clean);
    assert_eq!(saving.apply(SaveFailed, now, debounce), Error);

    // Follow-up edits survive either outcome.
    let followup = Saving { dirty_again: true };
    assert!(matches!(followup.apply(SaveSucceeded, now, debounce), Dirty { .. }));
    assert!(matches!(followup.apply(SaveFailed, now, debounce), Dirty { .. }));
  }

  #[tokio::test]
  async fn test_save_fires_at_the_deadline_not_before() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut autosave = counting_loop(counter.clone());

    autosave.record_edit();
    drive(&mut autosave, DEBOUNCE / 2).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    drive(&mut autosave, DEBOUNCE).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(autosave.state(), AutosaveState::Clean);
    assert!(autosave.status().last_saved.is_some());
  }

  #[tokio::test]
  async fn test_rapid_edits_coalesce_into_one_save() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut autosave = counting_loop(counter.clone());

    // Edits at t=0 and t=debounce/2: the timer resets, one save total.
    autosave.record_edit();
    drive(&mut autosave, DEBOUNCE / 2).await;
    autosave.record_edit();
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    drive(&mut autosave, DEBOUNCE * 2).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_edit_during_flight_schedules_exactly_one_followup() {
    let counter = Arc::new(AtomicU32::new(0));
    let in_flight = Arc::new(AtomicU32::new(0));
    let overlap = Arc::new(AtomicU32::new(0));

    let mut autosave = {
      let counter = counter.clone();
      let in_flight = in_flight.clone();
      let overlap = overlap.clone();
      AutosaveLoop::new(move || {
        let counter = counter.clone();
        let in_flight = in_flight.clone();
        let overlap = overlap.clone();
        async move {
          if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            overlap.fetch_add(1, Ordering::SeqCst);
          }
          tokio::time::sleep(Duration::from_millis(40)).await;
          in_flight.fetch_sub(1, Ordering::SeqCst);
          counter.fetch_add(1, Ordering::SeqCst);
          Ok(())
        }
      })
      .with_debounce(DEBOUNCE)
    };

    autosave.record_edit();
    drive(&mut autosave, DEBOUNCE + Duration::from_millis(10)).await;
    assert!(autosave.status().is_saving);

    // Edit while the save is in flight.
    autosave.record_edit();
    assert_eq!(autosave.state(), AutosaveState::Saving { dirty_again: true });

    drive(&mut autosave, DEBOUNCE * 4).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(overlap.load(Ordering::SeqCst), 0);
    assert_eq!(autosave.state(), AutosaveState::Clean);
  }

  #[tokio::test]
  async fn test_failure_retains_edits_and_does_not_retry() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut autosave = {
      let counter = counter.clone();
      AutosaveLoop::new(move || {
        let counter = counter.clone();
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          Err("disk on fire".to_string())
        }
      })
      .with_debounce(DEBOUNCE)
    };

    autosave.record_edit();
    drive(&mut autosave, DEBOUNCE * 2).await;

    assert_eq!(autosave.state(), AutosaveState::Error);
    assert!(autosave.status().has_unsaved_changes);
    assert_eq!(autosave.last_error(), Some("disk on fire"));

    // No automatic retry loop.
    drive(&mut autosave, DEBOUNCE * 2).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // The next edit re-arms.
    autosave.record_edit();
    drive(&mut autosave, DEBOUNCE * 2).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_manual_save_bypasses_timer_but_not_a_flight() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut autosave = {
      let counter = counter.clone();
      AutosaveLoop::new(move || {
        let counter = counter.clone();
        async move {
          tokio::time::sleep(Duration::from_millis(40)).await;
          counter.fetch_add(1, Ordering::SeqCst);
          Ok(())
        }
      })
      .with_debounce(DEBOUNCE)
    };

    autosave.record_edit();
    assert!(autosave.save_now());
    assert!(autosave.status().is_saving);

    // A second manual save during the flight is ignored, not queued.
    assert!(!autosave.save_now());

    drive(&mut autosave, Duration::from_millis(100)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(autosave.state(), AutosaveState::Clean);
  }

  #[tokio::test]
  async fn test_cancel_disarms_the_pending_timer() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut autosave = counting_loop(counter.clone());

    autosave.record_edit();
    autosave.cancel();

    drive(&mut autosave, DEBOUNCE * 2).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(autosave.state(), AutosaveState::Clean);
  }
}

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Escalating suspicion of distraction. GREEN is calm, RED drives the
/// blocking surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttentionState {
    Green,
    Yellow,
    Ambiguous,
    Red,
}

impl AttentionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionState::Green => "GREEN",
            AttentionState::Yellow => "YELLOW",
            AttentionState::Ambiguous => "AMBIGUOUS",
            AttentionState::Red => "RED",
        }
    }
}

impl fmt::Display for AttentionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttentionState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GREEN" => Ok(AttentionState::Green),
            "YELLOW" => Ok(AttentionState::Yellow),
            "AMBIGUOUS" => Ok(AttentionState::Ambiguous),
            "RED" => Ok(AttentionState::Red),
            other => Err(anyhow::anyhow!("unknown attention state: {other}")),
        }
    }
}

/// One entry in the append-only transition log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub from: AttentionState,
    pub to: AttentionState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

struct MachineCell {
    current: AttentionState,
    previous: Option<AttentionState>,
    transitions: Vec<Transition>,
    ambiguous_timer: Option<JoinHandle<()>>,
}

struct MachineInner {
    cell: Mutex<MachineCell>,
    state_tx: watch::Sender<AttentionState>,
    ambiguous_timeout: Duration,
}

/// Holds the current attention level and governs transitions.
///
/// Transitions are guarded: a transition already in progress makes concurrent
/// `transition_to` calls return `false` immediately instead of blocking.
/// Entering AMBIGUOUS arms a timeout that auto-escalates to RED unless some
/// other transition lands first.
#[derive(Clone)]
pub struct MonitoringStateMachine {
    inner: Arc<MachineInner>,
}

impl MonitoringStateMachine {
    pub const DEFAULT_AMBIGUOUS_TIMEOUT: Duration = Duration::from_secs(15);

    pub fn new(ambiguous_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(AttentionState::Green);
        Self {
            inner: Arc::new(MachineInner {
                cell: Mutex::new(MachineCell {
                    current: AttentionState::Green,
                    previous: None,
                    transitions: Vec::new(),
                    ambiguous_timer: None,
                }),
                state_tx,
                ambiguous_timeout,
            }),
        }
    }

    pub fn state(&self) -> AttentionState {
        self.lock_cell().current
    }

    pub fn previous_state(&self) -> Option<AttentionState> {
        self.lock_cell().previous
    }

    /// Watch the current state. The sampler uses this to re-tune its period,
    /// the session monitor to react to auto-escalation.
    pub fn subscribe(&self) -> watch::Receiver<AttentionState> {
        self.inner.state_tx.subscribe()
    }

    /// Moves to `new_state`, recording `reason`. Returns `false` when another
    /// transition holds the guard (callers retry on their next tick). A
    /// transition into the current state is a no-op that still succeeds.
    pub fn transition_to(&self, new_state: AttentionState, reason: &str) -> bool {
        let mut cell = match self.inner.cell.try_lock() {
            Ok(cell) => cell,
            Err(std::sync::TryLockError::WouldBlock) => {
                warn!("state transition in progress, skipping transition to {new_state}");
                return false;
            }
            Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                // A panicked transition must not wedge detection; recover the
                // cell and reset to GREEN below.
                error!("state machine lock poisoned, resetting to GREEN");
                let mut cell = poisoned.into_inner();
                Self::clear_timer(&mut cell);
                cell.current = AttentionState::Green;
                cell.previous = None;
                self.inner.state_tx.send_replace(AttentionState::Green);
                return false;
            }
        };

        if cell.current == new_state {
            return true;
        }

        let from = cell.current;

        if from == AttentionState::Ambiguous {
            Self::clear_timer(&mut cell);
        }

        cell.previous = Some(from);
        cell.current = new_state;

        if new_state == AttentionState::Ambiguous {
            cell.ambiguous_timer = Some(self.spawn_ambiguous_timer());
        }

        cell.transitions.push(Transition {
            from,
            to: new_state,
            reason: reason.to_string(),
            at: Utc::now(),
        });

        info!("attention state {from} -> {new_state} ({reason})");
        self.inner.state_tx.send_replace(new_state);
        true
    }

    /// Unconditionally returns to GREEN, cancelling any pending ambiguous
    /// timeout. Used at session start/stop boundaries.
    pub fn reset(&self) {
        let mut cell = self.lock_cell();
        Self::clear_timer(&mut cell);
        cell.previous = Some(cell.current);
        cell.current = AttentionState::Green;
        drop(cell);
        self.inner.state_tx.send_replace(AttentionState::Green);
    }

    pub fn transition_history(&self) -> Vec<Transition> {
        self.lock_cell().transitions.clone()
    }

    pub fn clear_history(&self) {
        self.lock_cell().transitions.clear();
    }

    fn spawn_ambiguous_timer(&self) -> JoinHandle<()> {
        let machine = self.clone();
        let timeout = self.inner.ambiguous_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if machine.state() == AttentionState::Ambiguous {
                info!("AMBIGUOUS held for {timeout:?} without resolution, escalating");
                machine.transition_to(AttentionState::Red, "ambiguous timeout");
            }
        })
    }

    fn clear_timer(cell: &mut MachineCell) {
        if let Some(timer) = cell.ambiguous_timer.take() {
            timer.abort();
        }
    }

    fn lock_cell(&self) -> std::sync::MutexGuard<'_, MachineCell> {
        self.inner
            .cell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MonitoringStateMachine {
    fn default() -> Self {
        Self::new(Self::DEFAULT_AMBIGUOUS_TIMEOUT)
    }
}

//! Worker states and the grab retry budget
//!
//! The retry logic is a plain state machine with no I/O so it can be tested
//! without a camera: feed it grab results, act on the [`LoopAction`] it returns.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::camera::device::GrabResult;
use crate::constants::camera;
use crate::data::Frame;
use crate::settings::CameraSettings;
use fl_error::FlexlineError;

/// Lifecycle of a capture worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    Idle,
    Opening,
    Configuring,
    Grabbing,
    WaitingForTrigger,
    Retrying,
    Restarting,
    Stopped,
}

impl WorkerState {
    /// States in which the worker is still producing frames or recovering
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Grabbing | Self::WaitingForTrigger | Self::Retrying | Self::Restarting
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Wait between close and reopen during a restart
    pub restart_settle: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: camera::DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(camera::DEFAULT_RETRY_DELAY_MS),
            restart_settle: Duration::from_millis(camera::DEFAULT_RESTART_SETTLE_MS),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &CameraSettings) -> Self {
        Self {
            max_retries: settings.max_retries.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            restart_settle: Duration::from_millis(settings.restart_settle_ms),
        }
    }
}

/// What the loop should do after a grab attempt
#[derive(Debug, Clone, PartialEq)]
pub enum LoopAction {
    /// Frame ready; hand a copy to the station
    Emit(Frame),
    /// Nothing arrived; pause briefly and wait again
    Idle(Duration),
    /// Report `error`, sleep `delay`, try again
    Retry { error: String, delay: Duration },
    /// Report `error`, then close and reopen the device
    Restart { error: String },
}

/// Consecutive-failure counter for one worker
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    retry_count: u32,
    restarts: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retry_count: 0,
            restarts: 0,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Restarts performed over the worker's lifetime
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn on_success(&mut self) {
        self.retry_count = 0;
    }

    /// Count a failure; returns true when the budget is spent and a restart is due
    pub fn on_failure(&mut self) -> bool {
        self.retry_count += 1;
        self.retry_count >= self.policy.max_retries
    }

    /// A restart completed; the budget starts over
    pub fn on_restarted(&mut self) {
        self.retry_count = 0;
        self.restarts += 1;
    }

    /// Map one grab result to the loop's next step
    pub fn handle(&mut self, result: GrabResult) -> LoopAction {
        match result {
            GrabResult::Succeeded(frame) => {
                self.on_success();
                LoopAction::Emit(frame)
            }
            GrabResult::TimedOut => LoopAction::Idle(camera::IDLE_BACKOFF),
            GrabResult::Failed(reason) => {
                let error = FlexlineError::GrabFailure(reason).to_string();
                if self.on_failure() {
                    LoopAction::Restart { error }
                } else {
                    LoopAction::Retry {
                        error,
                        delay: self.policy.retry_delay,
                    }
                }
            }
        }
    }
}

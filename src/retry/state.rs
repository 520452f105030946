//! Retry state machine
//!
//! Every attempt resolves to an [`Outcome`]; [`Transition::decide`] maps the
//! outcome and the current [`Mode`] to the side effects of that attempt (node
//! accounting, node switch, delay) and to what the loop does next.
//!
//! ```text
//!            412 (pool configured)
//!   Direct ───────────────────────▶ Proxied
//!     │  ▲                            │  ▲
//!     └──┘ transport / status         └──┘ transport / 412: fail node + switch
//!                                          other status: backoff
//! ```
//!
//! Escalation is one-way for the lifetime of a single retrier call.

use std::time::Duration;

use reqwest::StatusCode;

use super::policy::RetryPolicy;
use crate::error::PoolError;

/// Status the origin uses to signal that the caller is blocked
pub const BLOCK_STATUS: StatusCode = StatusCode::PRECONDITION_FAILED;

/// How an attempt reaches the origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Direct,
    Proxied,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Direct => "direct",
            Mode::Proxied => "proxied",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classified result of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Transport,
    Status(StatusCode),
    Fatal,
}

impl Outcome {
    pub fn of<T>(result: &Result<T, PoolError>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(PoolError::Transport { .. }) => Outcome::Transport,
            Err(PoolError::HttpStatus { status, .. }) => Outcome::Status(*status),
            Err(_) => Outcome::Fatal,
        }
    }
}

/// Accounting applied to the node that carried the attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Success,
    Failure,
}

/// What the loop does after the attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Hand the response to the caller
    Return,
    /// Sleep, then run the next attempt
    Retry { delay: Duration },
    /// Surface the error without retrying
    Abort,
}

/// Side effects and follow-up of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub mode: Mode,
    pub report: Option<Report>,
    pub switch: bool,
    pub step: Step,
}

impl Transition {
    /// Decide the transition for an attempt.
    ///
    /// `has_pool` tells whether proxying is available at all; `has_node` whether a
    /// node was active when the attempt was issued (only meaningful when proxied).
    pub fn decide(
        mode: Mode,
        has_pool: bool,
        has_node: bool,
        outcome: Outcome,
        attempt: u32,
        policy: &RetryPolicy,
    ) -> Self {
        let attributable = mode == Mode::Proxied && has_node;
        let stay = |report, switch, step| Transition {
            mode,
            report,
            switch,
            step,
        };

        match outcome {
            Outcome::Success => stay(attributable.then_some(Report::Success), false, Step::Return),
            Outcome::Fatal => stay(None, false, Step::Abort),
            Outcome::Transport => stay(
                attributable.then_some(Report::Failure),
                attributable,
                Step::Retry {
                    delay: policy.transport_delay(attempt),
                },
            ),
            Outcome::Status(status) if status == BLOCK_STATUS && mode == Mode::Direct && has_pool => {
                Transition {
                    mode: Mode::Proxied,
                    report: None,
                    switch: false,
                    step: Step::Retry {
                        delay: policy.block_delay,
                    },
                }
            }
            Outcome::Status(status) if status == BLOCK_STATUS && attributable => stay(
                Some(Report::Failure),
                true,
                Step::Retry {
                    delay: policy.block_delay,
                },
            ),
            Outcome::Status(_) => stay(
                None,
                false,
                Step::Retry {
                    delay: policy.status_delay(attempt),
                },
            ),
        }
    }
}

/// Per-call retry state
#[derive(Debug, Default)]
pub struct AttemptContext {
    pub attempt: u32,
    mode: Mode,
    pub last_error: Option<PoolError>,
}

impl AttemptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Adopt the transition's mode. Proxied never reverts to Direct.
    pub fn apply(&mut self, transition: &Transition) -> bool {
        let escalated = self.mode == Mode::Direct && transition.mode == Mode::Proxied;
        if escalated {
            self.mode = Mode::Proxied;
        }
        escalated
    }
}

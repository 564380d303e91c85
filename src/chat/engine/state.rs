//! Turn lifecycle states.

use std::fmt;

/// Where a turn is in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TurnState {
    /// Created, nothing sent yet.
    Idle,
    /// Reading a model step.
    ModelStreaming,
    /// Running a requested tool.
    ToolExecuting,
    /// Persisting and emitting the finish frame.
    Finishing,
    /// The stream is closed.
    Closed,
}

impl TurnState {
    /// Whether `next` may follow `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::ModelStreaming)
                | (Self::ModelStreaming, Self::ToolExecuting)
                | (Self::ToolExecuting, Self::ModelStreaming | Self::ToolExecuting)
                | (
                    Self::ModelStreaming | Self::ToolExecuting,
                    Self::Finishing
                )
                | (_, Self::Closed)
        )
    }

    /// Lowercase label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ModelStreaming => "model_streaming",
            Self::ToolExecuting => "tool_executing",
            Self::Finishing => "finishing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records every state a turn passes through.
#[derive(Clone, Debug)]
pub struct StateTrace {
    current: TurnState,
    history: Vec<TurnState>,
}

impl Default for StateTrace {
    fn default() -> Self {
        Self {
            current: TurnState::Idle,
            history: vec![TurnState::Idle],
        }
    }
}

impl StateTrace {
    /// Every state entered so far, `Idle` first.
    #[must_use]
    pub fn history(&self) -> &[TurnState] {
        &self.history
    }

    /// Move to `next`. Self-transitions are ignored.
    pub fn enter(&mut self, next: TurnState) {
        if next == self.current {
            return;
        }
        if !self.current.can_transition_to(next) {
            tracing::warn!(from = %self.current, to = %next, "unexpected turn transition");
        }
        tracing::debug!(from = %self.current, to = %next, "turn transition");
        self.current = next;
        self.history.push(next);
    }
}

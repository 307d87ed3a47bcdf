use std::fmt;

use tracing::debug;

use super::task::ExitOutcome;

/// Lifecycle of one launcher invocation.
///
/// ```text
/// Idle → Resolving → CacheLookup ─┬─ hit ──────────────→ Spawning → Running → Terminated
///                                 └─ miss → Fetching ──↗
/// ```
/// Any non-terminal state may move to `Failed`. No state is re-entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    Resolving,
    CacheLookup,
    Fetching,
    Spawning,
    Running,
    Terminated(ExitOutcome),
    Failed(String),
}

impl LaunchState {
    fn rank(&self) -> u8 {
        match self {
            LaunchState::Idle => 0,
            LaunchState::Resolving => 1,
            LaunchState::CacheLookup => 2,
            LaunchState::Fetching => 3,
            LaunchState::Spawning => 4,
            LaunchState::Running => 5,
            LaunchState::Terminated(_) | LaunchState::Failed(_) => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LaunchState::Terminated(_) | LaunchState::Failed(_))
    }

    fn allows(&self, next: &LaunchState) -> bool {
        use LaunchState::*;
        match (self, next) {
            (_, Failed(_)) => !self.is_terminal(),
            (Idle, Resolving)
            | (Resolving, CacheLookup)
            | (CacheLookup, Fetching)
            | (CacheLookup, Spawning)
            | (Fetching, Spawning)
            | (Spawning, Running)
            | (Running, Terminated(_)) => true,
            // The local binary override skips resolution and the cache.
            (Idle, Spawning) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchState::Idle => write!(f, "idle"),
            LaunchState::Resolving => write!(f, "resolving"),
            LaunchState::CacheLookup => write!(f, "cache-lookup"),
            LaunchState::Fetching => write!(f, "fetching"),
            LaunchState::Spawning => write!(f, "spawning"),
            LaunchState::Running => write!(f, "running"),
            LaunchState::Terminated(outcome) => write!(f, "terminated({outcome})"),
            LaunchState::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

/// Tracks and enforces the launch state machine.
#[derive(Debug)]
pub struct LaunchSession {
    state: LaunchState,
    visited: Vec<u8>,
}

impl Default for LaunchSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LaunchSession {
    pub fn new() -> Self {
        Self {
            state: LaunchState::Idle,
            visited: vec![LaunchState::Idle.rank()],
        }
    }

    pub fn state(&self) -> &LaunchState {
        &self.state
    }

    /// Move to `next`. Illegal transitions are a programming error and
    /// are reported without changing state.
    pub fn advance(&mut self, next: LaunchState) -> Result<(), String> {
        if !self.state.allows(&next) || self.visited.contains(&next.rank()) {
            return Err(format!("illegal launch transition {} -> {}", self.state, next));
        }
        debug!("launch state {} -> {}", self.state, next);
        self.visited.push(next.rank());
        self.state = next;
        Ok(())
    }
}

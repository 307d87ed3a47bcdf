pub mod launcher;
pub mod state;
pub mod task;

pub use launcher::{LaunchFailure, Launcher};
pub use state::{LaunchSession, LaunchState};
pub use task::{exit_like, run_child, spawn_child, ExitOutcome};

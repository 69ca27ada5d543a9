//! Position management: exit detection, trailing stops with the ratchet
//! invariant, partial-exit ladders, and the lifecycle manager that owns
//! live positions.
//!
//! **Module structure:**
//! - `ratchet`: one-directional level enforcement
//! - `trailing`: activation + callback trailing stop
//! - `ladder`: partial take-profit rungs
//! - `exits`: intrabar fill rules and the stop-first tie-break
//! - `manager`: per-bar state machine over all live positions

pub mod exits;
pub mod ladder;
pub mod manager;
pub mod ratchet;
pub mod trailing;

pub use exits::{effective_stop, protective_exit, stop_fill, target_fill};
pub use ladder::{ExitLadder, LadderRung};
pub use manager::{ExitEvent, LifecycleManager};
pub use ratchet::RatchetState;
pub use trailing::TrailingStop;

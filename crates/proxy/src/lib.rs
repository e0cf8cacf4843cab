//! Wrappers that compose with any `replay_state::StateBackend` without
//! changing its observable behavior (spec.md §2 "Proxy wrappers"): a
//! recording proxy that tees mutations into a trace, a debug proxy that
//! logs them, and a priming loader that simplifies bulk genesis loading.

pub mod debug;
pub mod priming;
pub mod recording;

pub use debug::DebugState;
pub use priming::{PrimedAccount, PrimingLoader};
pub use recording::RecordingState;

//! Event plumbing shared by the editor core: cancellable delayed tasks,
//! generation tokens for stale-work detection and a bounded event bus.

pub mod bus;
pub mod debounce;
pub mod generation;

pub use bus::{
  EventBus,
  Subscription,
};
pub use debounce::DelayedTask;
pub use generation::{
  Generation,
  GenerationToken,
};

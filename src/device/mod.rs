//! Receiver ownership and tuning state

mod arbiter;
mod state;

pub use arbiter::{DeviceArbiter, Owner};
pub use state::{Gain, SourceStats, TuningState};

//! Chaos experiment orchestrator for the video analysis pipeline.

pub mod cancel;
pub mod clock;
pub mod injector;
pub mod journal;
pub mod lease;
pub mod phases;
pub mod pipeline;
pub mod poll;
pub mod probes;
pub mod report;
pub mod sequencer;
pub mod state_machine;
pub mod workload;

#[cfg(test)]
mod testing;

pub use cancel::*;
pub use clock::*;
pub use injector::*;
pub use journal::*;
pub use lease::*;
pub use phases::*;
pub use pipeline::*;
pub use poll::*;
pub use probes::*;
pub use report::*;
pub use sequencer::*;
pub use state_machine::*;
pub use workload::*;

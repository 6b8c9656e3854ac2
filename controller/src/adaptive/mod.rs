//! Adaptive multimodal input, the core of the daemon.
//!
//! Provides:
//! - `grid`: board labels, blocklist filtering, target geometry
//! - `dwell`: gaze/pointer dwell selection state machine
//! - `affect`: facial-expression → affect classifier
//! - `method_tracker`: per-method performance and best-method recommendation
//! - `policy`: affect → UI adaptation directive
//! - `switch_scan`: scan cursor for switch access
//! - `controller`: session object tying the above together

pub mod affect;
pub mod controller;
pub mod dwell;
pub mod grid;
pub mod method_tracker;
pub mod policy;
pub mod switch_scan;

pub use controller::{Controller, ControllerEvent, PerformanceSample, Rejection, SampleSpace, SideEffects};

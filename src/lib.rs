//! Deterministic timetable scheduling core for multi-stop transit lines: slot
//! arithmetic, departure decisions, delay recovery, train-slot binding, skip-stop
//! patterns, validation and delay statistics, fronted by a single `Engine` and driven
//! through the host's `SimulationFacade`.

pub mod binding;
pub mod cache;
pub mod clock;
pub mod departure;
pub mod engine;
pub mod error;
pub mod export;
pub mod facade;
pub mod model;
pub mod recovery;
pub mod scenario;
pub mod skip;
pub mod slot_assign;
pub mod snapshot;
pub mod stats;
pub mod validation;

pub use engine::Engine;
pub use error::{CoreError, CoreResult};
pub use facade::SimulationFacade;

//! Cellular-automaton grid simulation: rule, seed patterns, kernel parameters, and the
//! ping-pong stepper that encodes one generation per frame.

pub mod rules;
pub mod seed;
pub mod state;
pub mod stepper;

pub use rules::{BoundaryMode, LifeRule};
pub use seed::SeedPattern;
pub use state::SimulationState;
pub use stepper::{GridBinding, GridRole, GridStepper};

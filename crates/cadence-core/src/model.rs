//! The atomic model contract.
//!
//! An atomic model is a state machine with four transition functions and an
//! output function, driven entirely by the kernel:
//!
//! - `time_advance` declares when the next self-activation is due,
//! - `output` (λ) runs immediately before an internal or confluent
//!   transition and posts values through an [`OutputCollector`],
//! - `internal_transition` (δint) fires on self-activation,
//! - `external_transition` (δext) fires when input arrives earlier,
//! - `confluent_transition` (δcon) fires when both coincide; the default is
//!   δint followed by δext with zero elapsed time.
//!
//! Elapsed time is maintained by the kernel and rescaled into the model's
//! declared precision before every call; `time_advance` results are
//! rescaled the same way on the way out.

use crate::duration::Duration;
use crate::hierarchy::{OutputCollector, PortError};
use crate::message::Bag;
use crate::scale::Scale;
use crate::state::StateError;

/// Errors surfaced by model code during initialization, output, or a
/// transition. Any of these aborts the running simulation.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    State(#[from] StateError),

    /// Domain-specific failure raised by model code.
    #[error("model failure: {0}")]
    Failure(String),
}

/// Behavior of an atomic (leaf) model.
pub trait AtomicModel: std::fmt::Debug {
    /// The scale the kernel rescales `elapsed` and `time_advance` into.
    fn precision(&self) -> Scale {
        Scale::BASE
    }

    /// Set up initial state. Runs once, before the first scheduling pass.
    fn initialize(&mut self) -> Result<(), ModelError> {
        Ok(())
    }

    /// Time until the next self-activation, from the current state. Must be
    /// pure with respect to state; return [`Duration::INFINITY`] to
    /// passivate.
    fn time_advance(&self) -> Duration;

    /// Mutate state on self-activation.
    fn internal_transition(&mut self) -> Result<(), ModelError>;

    /// Mutate state on external input. The bag is never empty.
    fn external_transition(&mut self, elapsed: Duration, bag: &Bag) -> Result<(), ModelError>;

    /// Mutate state when self-activation and external input coincide.
    fn confluent_transition(&mut self, bag: &Bag) -> Result<(), ModelError> {
        self.internal_transition()?;
        self.external_transition(Duration::zero(self.precision()), bag)
    }

    /// Emit output values. Invoked only immediately before an internal or
    /// confluent transition.
    fn output(&mut self, collector: &mut OutputCollector<'_>) -> Result<(), ModelError>;

    /// Downcast support for inspection after a run.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

//! Observation hooks.
//!
//! Three surfaces, all synchronous and all contained: lifecycle hooks on
//! the simulation, transition observers on models, and value observers on
//! atomic output ports. An observer returning an error is reported and
//! skipped, and never corrupts or aborts the simulation.

use crate::id::Name;
use crate::message::Value;
use crate::time::TimePoint;

/// A lifecycle notification point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    PreInit,
    PostInit,
    PreSimulation,
    PostSimulation,
    PostAbort,
    PreStep,
    PostStep,
}

/// Which transition fired on a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Init,
    Internal,
    External,
    Confluent,
}

/// Context delivered with every model observer update.
#[derive(Debug, Clone)]
pub struct TransitionInfo {
    pub time: TimePoint,
    pub transition: Transition,
}

/// Failure inside an observer. Reported and contained by the kernel.
#[derive(Debug, Clone, thiserror::Error)]
#[error("observer failure: {0}")]
pub struct ObserverError(pub String);

/// Receives lifecycle hooks from the simulation.
pub trait HookListener: std::fmt::Debug {
    fn notify(&mut self, hook: Hook) -> Result<(), ObserverError>;
}

/// Receives transition notifications from one model.
pub trait ModelObserver: std::fmt::Debug {
    fn update(&mut self, model: &Name, info: &TransitionInfo) -> Result<(), ObserverError>;
}

/// Receives values emitted on one atomic output port during the output
/// wave. Only output ports of atomic models are observable.
pub trait PortObserver: std::fmt::Debug {
    fn notify(
        &mut self,
        port: &Name,
        value: &Value,
        time: &TimePoint,
    ) -> Result<(), ObserverError>;
}

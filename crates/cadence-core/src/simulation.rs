//! The simulation driver.
//!
//! [`Simulation`] consumes a [`ModelTree`], builds the processor tree, and
//! drives the PDEVS protocol:
//!
//! 1. **Initialize**: every atomic sets up state and advertises its first
//!    `tn`; coordinators aggregate minima bottom-up through their event
//!    sets.
//! 2. **Step**: advance the clock to the root's `tn`, pop the imminent
//!    set, run the output wave (λ + routing into receiver bags), then the
//!    transition wave (δint / δext / δcon by imminence and input), and
//!    reschedule every affected processor up through its ancestors.
//! 3. **Stop** on event-set exhaustion, the configured end horizon, or an
//!    abort flag checked at step boundaries.
//!
//! Every output at a virtual time is produced before any transition at
//! that time, and every transition completes before the clock moves.

use crate::duration::{Duration, DurationError};
use crate::hierarchy::{CouplingError, ModelTree, OutputCollector, PortError, PortMode};
use crate::id::{ModelId, Name, PortId};
use crate::message::Bag;
use crate::model::ModelError;
use crate::observer::{
    Hook, HookListener, ModelObserver, PortObserver, Transition, TransitionInfo,
};
use crate::processor::{collect_imminent, ProcState};
use crate::schedule::{EventSet, ScheduleKind};
use crate::state::StateError;
use crate::stats::TransitionStats;
use crate::time::TimePoint;
use slotmap::SecondaryMap;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Top-level simulation error.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Coupling(#[from] CouplingError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Duration(#[from] DurationError),

    #[error(transparent)]
    State(#[from] StateError),

    /// A model failed during initialization, output, or a transition; the
    /// simulation aborted.
    #[error("model `{model}` failed during {phase}: {source}")]
    Model {
        model: Name,
        phase: &'static str,
        source: ModelError,
    },

    /// A model or port id that this simulation's processor tree does not
    /// own.
    #[error("model or port is not owned by this simulation's processor tree")]
    InvalidProcessor,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Construction-time options.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Keep the coupled hierarchy at runtime. When `false` the tree is
    /// flattened to direct leaf-to-leaf couplings before the processor
    /// tree is built.
    pub maintain_hierarchy: bool,

    /// Event-set discipline. Overrides any preference declared on coupled
    /// models; when absent, each coordinator uses its model's preference
    /// or falls back to the binary heap.
    pub scheduler: Option<ScheduleKind>,

    /// Virtual end horizon, measured from the time origin. Steps whose
    /// time would pass the horizon do not run.
    pub end_time: Option<Duration>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationConfig {
    pub fn new() -> SimulationConfig {
        SimulationConfig {
            maintain_hierarchy: true,
            scheduler: None,
            end_time: None,
        }
    }

    pub fn flattened(mut self) -> SimulationConfig {
        self.maintain_hierarchy = false;
        self
    }

    pub fn with_scheduler(mut self, kind: ScheduleKind) -> SimulationConfig {
        self.scheduler = Some(kind);
        self
    }

    pub fn with_end_time(mut self, end: Duration) -> SimulationConfig {
        self.end_time = Some(end);
        self
    }
}

/// Lifecycle phase of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    Running,
    Done,
    Aborted,
}

/// Cloneable flag that requests termination at the next step boundary.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Rc<Cell<bool>>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.set(true);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.get()
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// A runnable simulation over one model tree.
#[derive(Debug)]
pub struct Simulation {
    tree: ModelTree,
    config: SimulationConfig,

    // -- Processor tree (SoA, keyed by ModelId) --
    procs: SecondaryMap<ModelId, ProcState>,
    schedules: SecondaryMap<ModelId, Box<dyn EventSet>>,
    bags: SecondaryMap<ModelId, Bag>,

    // -- Per-step scratch --
    influenced: Vec<ModelId>,
    influenced_mark: SecondaryMap<ModelId, ()>,
    imminent_mark: SecondaryMap<ModelId, ()>,

    // -- Observation --
    hooks: Vec<Box<dyn HookListener>>,
    model_observers: SecondaryMap<ModelId, Vec<Box<dyn ModelObserver>>>,
    port_observers: SecondaryMap<PortId, Vec<Box<dyn PortObserver>>>,

    time: TimePoint,
    status: Status,
    stats: TransitionStats,
    abort: AbortHandle,
    wall: Option<std::time::Duration>,
}

impl Simulation {
    /// Build a simulation over `tree`, flattening it first when the
    /// configuration says so.
    pub fn new(mut tree: ModelTree, config: SimulationConfig) -> Simulation {
        if !config.maintain_hierarchy {
            tree.flatten();
        }
        Simulation {
            tree,
            config,
            procs: SecondaryMap::new(),
            schedules: SecondaryMap::new(),
            bags: SecondaryMap::new(),
            influenced: Vec::new(),
            influenced_mark: SecondaryMap::new(),
            imminent_mark: SecondaryMap::new(),
            hooks: Vec::new(),
            model_observers: SecondaryMap::new(),
            port_observers: SecondaryMap::new(),
            time: TimePoint::zero(),
            status: Status::Ready,
            stats: TransitionStats::default(),
            abort: AbortHandle::default(),
            wall: None,
        }
    }

    // -----------------------------------------------------------------------
    // Read-only surface
    // -----------------------------------------------------------------------

    pub fn virtual_time(&self) -> &TimePoint {
        &self.time
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn transition_stats(&self) -> &TransitionStats {
        &self.stats
    }

    /// Wall-clock seconds of the last completed `simulate` call.
    pub fn elapsed_secs(&self) -> Option<f64> {
        self.wall.map(|d| d.as_secs_f64())
    }

    pub fn tree(&self) -> &ModelTree {
        &self.tree
    }

    /// The behavior of an atomic model, for post-run inspection.
    pub fn behavior(&self, model: ModelId) -> Option<&dyn crate::model::AtomicModel> {
        self.tree.behavior(model)
    }

    /// Time of a model's last transition. `None` before initialization or
    /// for foreign ids.
    pub fn last_transition(&self, model: ModelId) -> Option<&TimePoint> {
        self.procs.get(model).map(|p| &p.tl)
    }

    /// Time of a model's next scheduled transition. `None` when passive,
    /// before initialization, or for foreign ids.
    pub fn next_transition(&self, model: ModelId) -> Option<&TimePoint> {
        self.procs.get(model).and_then(|p| p.tn.as_ref())
    }

    /// A flag that aborts the run at the next step boundary.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Request termination at the next step boundary.
    pub fn abort(&mut self) {
        self.abort.abort();
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    pub fn add_hook_listener(&mut self, listener: Box<dyn HookListener>) {
        self.hooks.push(listener);
    }

    /// Observe transitions of one model.
    pub fn add_model_observer(
        &mut self,
        model: ModelId,
        observer: Box<dyn ModelObserver>,
    ) -> Result<(), SimulationError> {
        if !self.tree.contains(model) {
            return Err(SimulationError::InvalidProcessor);
        }
        self.model_observers
            .entry(model)
            .map(|e| e.or_default().push(observer))
            .ok_or(SimulationError::InvalidProcessor)
    }

    /// Observe values on an atomic output port. Input ports and coupled
    /// models' ports are not observable.
    pub fn add_port_observer(
        &mut self,
        port: PortId,
        observer: Box<dyn PortObserver>,
    ) -> Result<(), SimulationError> {
        let Some(data) = self.tree.port(port) else {
            return Err(SimulationError::InvalidProcessor);
        };
        if data.mode != PortMode::Output || !self.tree.is_atomic(data.host) {
            let model = self
                .tree
                .name(data.host)
                .cloned()
                .unwrap_or_else(|| Name::from("?"));
            return Err(PortError::Unobservable {
                model,
                port: data.name.clone(),
            }
            .into());
        }
        self.port_observers
            .entry(port)
            .map(|e| e.or_default().push(observer))
            .ok_or(SimulationError::InvalidProcessor)
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Run until the event set empties, the end horizon is reached, or an
    /// abort is requested.
    pub fn simulate(&mut self) -> Result<(), SimulationError> {
        let start = Instant::now();
        self.notify_hook(Hook::PreSimulation);
        while self.step()? {}
        self.wall = Some(start.elapsed());
        Ok(())
    }

    /// Run one step. Returns `false` once the simulation has finished;
    /// initializes lazily on the first call.
    pub fn step(&mut self) -> Result<bool, SimulationError> {
        match self.status {
            Status::Ready => self.initialize()?,
            Status::Running => {}
            Status::Done | Status::Aborted => return Ok(false),
        }
        if self.abort.is_aborted() {
            self.finish_aborted();
            return Ok(false);
        }
        let Some(t) = self.root_tn() else {
            self.finish();
            return Ok(false);
        };
        if let Some(end) = &self.config.end_time
            && end.finite()
        {
            let horizon = TimePoint::zero().advance(end);
            if t > horizon {
                self.finish();
                return Ok(false);
            }
        }

        self.notify_hook(Hook::PreStep);
        self.time = t.clone();
        tracing::trace!(time = %self.time, "step");

        // Output wave: collect the imminent set, run λ on each leaf, route
        // everything. All outputs at `t` land before any transition at `t`.
        let mut imminent = Vec::new();
        collect_imminent(&self.tree, &mut self.schedules, self.tree.root(), &t, &mut imminent);

        self.influenced.clear();
        self.influenced_mark.clear();
        self.imminent_mark.clear();
        for &model in &imminent {
            self.imminent_mark.insert(model, ());
        }
        for &model in &imminent {
            self.run_output(model, &t)?;
        }

        // Transition wave: imminent leaves first (event-set order), then
        // the leaves that only received input, in marking order.
        let influenced = std::mem::take(&mut self.influenced);
        for &model in &imminent {
            self.run_transition(model, &t, true)?;
        }
        for &model in &influenced {
            if !self.imminent_mark.contains_key(model) {
                self.run_transition(model, &t, false)?;
            }
        }
        self.influenced = influenced;

        self.stats.steps += 1;
        self.notify_hook(Hook::PostStep);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Initialization
    // -----------------------------------------------------------------------

    fn initialize(&mut self) -> Result<(), SimulationError> {
        self.notify_hook(Hook::PreInit);
        let t0 = TimePoint::zero();

        // Processor rows, ranked by child insertion order.
        self.procs.insert(self.tree.root(), ProcState::new(0));
        let coupleds = self.tree.coupleds_postorder();
        for &c in &coupleds {
            for (rank, &child) in self.tree.children(c).iter().enumerate() {
                self.procs.insert(child, ProcState::new(rank as u32));
            }
        }

        // One event set per coordinator.
        for &c in &coupleds {
            let kind = self
                .config
                .scheduler
                .or_else(|| self.tree.preferred_schedule(c))
                .unwrap_or_default();
            self.schedules.insert(c, kind.make());
        }

        // Initialize leaves in depth-first order and advertise first times.
        let atomics = self.tree.atomics();
        for &a in &atomics {
            self.bags.insert(a, Bag::new());
            let outcome = {
                let Some(behavior) = self.tree.behaviors.get_mut(a) else {
                    return Err(SimulationError::InvalidProcessor);
                };
                behavior
                    .initialize()
                    .map(|_| behavior.time_advance().rescale(behavior.precision()))
            };
            let ta = match outcome {
                Ok(ta) => ta,
                Err(source) => {
                    let model = model_name(&self.tree, a);
                    self.finish_aborted();
                    return Err(SimulationError::Model {
                        model,
                        phase: "initialization",
                        source,
                    });
                }
            };
            if let Some(proc) = self.procs.get_mut(a) {
                proc.tl = t0.clone();
                proc.tn = if ta.finite() {
                    Some(t0.advance(&ta))
                } else {
                    None
                };
            }
            let name = model_name(&self.tree, a);
            self.stats.record(&name, Transition::Init);
            self.notify_model_observers(
                a,
                &TransitionInfo {
                    time: t0.clone(),
                    transition: Transition::Init,
                },
            );
        }

        // Aggregate minima bottom-up (children precede parents).
        for &c in &coupleds {
            let children: Vec<ModelId> = self.tree.children(c).to_vec();
            for child in children {
                let (ord, tn) = match self.procs.get(child) {
                    Some(p) => (p.ord, p.tn.clone()),
                    None => continue,
                };
                if let (Some(tn), Some(set)) = (tn, self.schedules.get_mut(c)) {
                    set.insert(child, ord, tn);
                }
            }
            let min = self.schedules.get(c).and_then(|s| s.peek_min().cloned());
            if let Some(proc) = self.procs.get_mut(c) {
                proc.tl = t0.clone();
                proc.tn = min;
            }
        }

        self.time = t0;
        self.status = Status::Running;
        tracing::debug!(
            atomics = atomics.len(),
            coordinators = coupleds.len(),
            "simulation initialized"
        );
        self.notify_hook(Hook::PostInit);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Output wave
    // -----------------------------------------------------------------------

    fn run_output(&mut self, model: ModelId, t: &TimePoint) -> Result<(), SimulationError> {
        let outcome = {
            let ModelTree {
                nodes,
                ports,
                behaviors,
                ..
            } = &mut self.tree;
            let Some(behavior) = behaviors.get_mut(model) else {
                return Err(SimulationError::InvalidProcessor);
            };
            let mut collector = OutputCollector::new(model, nodes, ports);
            behavior
                .output(&mut collector)
                .map(|_| collector.into_staged())
        };
        let staged = match outcome {
            Ok(staged) => staged,
            Err(source) => {
                let name = model_name(&self.tree, model);
                self.finish_aborted();
                return Err(SimulationError::Model {
                    model: name,
                    phase: "output",
                    source,
                });
            }
        };

        for (port, value) in staged {
            if let Some(observers) = self.port_observers.get_mut(port) {
                let name = self
                    .tree
                    .port_name(port)
                    .cloned()
                    .unwrap_or_else(|| Name::from("?"));
                for obs in observers.iter_mut() {
                    if let Err(err) = obs.notify(&name, &value, t) {
                        tracing::warn!(port = %name, error = %err, "port observer failed");
                    }
                }
            }
            for destination in self.tree.route(port) {
                let Some(host) = self.tree.port_host(destination) else {
                    continue;
                };
                let Some(port_name) = self.tree.port_name(destination).cloned() else {
                    continue;
                };
                if let Some(bag) = self.bags.get_mut(host) {
                    bag.push(port_name, value.clone());
                    if !self.influenced_mark.contains_key(host) {
                        self.influenced_mark.insert(host, ());
                        self.influenced.push(host);
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transition wave
    // -----------------------------------------------------------------------

    fn run_transition(
        &mut self,
        model: ModelId,
        t: &TimePoint,
        imminent: bool,
    ) -> Result<(), SimulationError> {
        let has_input = self.bags.get(model).is_some_and(|b| !b.is_empty());
        if !imminent && !has_input {
            return Ok(());
        }
        let transition = match (imminent, has_input) {
            (true, false) => Transition::Internal,
            (true, true) => Transition::Confluent,
            (false, true) => Transition::External,
            (false, false) => return Ok(()),
        };

        let tl = match self.procs.get(model) {
            Some(p) => p.tl.clone(),
            None => return Err(SimulationError::InvalidProcessor),
        };
        let bag = match self.bags.get_mut(model) {
            Some(b) => std::mem::take(b),
            None => Bag::new(),
        };

        let outcome = {
            let Some(behavior) = self.tree.behaviors.get_mut(model) else {
                return Err(SimulationError::InvalidProcessor);
            };
            let precision = behavior.precision();
            let elapsed = t.duration_since(&tl).rescale(precision);
            let result = match transition {
                Transition::Internal => behavior.internal_transition(),
                Transition::External => behavior.external_transition(elapsed, &bag),
                Transition::Confluent => behavior.confluent_transition(&bag),
                Transition::Init => Ok(()),
            };
            result.map(|_| behavior.time_advance().rescale(precision))
        };
        let ta = match outcome {
            Ok(ta) => ta,
            Err(source) => {
                let name = model_name(&self.tree, model);
                self.finish_aborted();
                return Err(SimulationError::Model {
                    model: name,
                    phase: "transition",
                    source,
                });
            }
        };

        if let Some(proc) = self.procs.get_mut(model) {
            proc.tl = t.clone();
            proc.tn = if ta.finite() {
                Some(t.advance(&ta))
            } else {
                None
            };
        }

        let name = model_name(&self.tree, model);
        self.stats.record(&name, transition);
        self.notify_model_observers(
            model,
            &TransitionInfo {
                time: t.clone(),
                transition,
            },
        );
        self.reschedule_upward(model);
        Ok(())
    }

    /// Push a processor's new `tn` into its parent's event set, then keep
    /// recomputing coordinator minima up to the root. Runs the full chain
    /// unconditionally: an imminent pop may have removed any ancestor from
    /// its parent's set, so every level needs its upsert.
    fn reschedule_upward(&mut self, model: ModelId) {
        let mut current = model;
        while let Some(parent) = self.tree.parent(current) {
            let (ord, tn) = match self.procs.get(current) {
                Some(p) => (p.ord, p.tn.clone()),
                None => break,
            };
            if let Some(set) = self.schedules.get_mut(parent) {
                set.adjust(current, ord, tn);
            }
            let min = self
                .schedules
                .get(parent)
                .and_then(|s| s.peek_min().cloned());
            if let Some(proc) = self.procs.get_mut(parent) {
                proc.tn = min;
            }
            current = parent;
        }
    }

    fn root_tn(&self) -> Option<TimePoint> {
        self.schedules
            .get(self.tree.root())
            .and_then(|s| s.peek_min().cloned())
    }

    // -----------------------------------------------------------------------
    // Termination
    // -----------------------------------------------------------------------

    fn finish(&mut self) {
        self.status = Status::Done;
        tracing::debug!(time = %self.time, steps = self.stats.steps, "simulation finished");
        self.notify_hook(Hook::PostSimulation);
    }

    fn finish_aborted(&mut self) {
        self.status = Status::Aborted;
        tracing::debug!(time = %self.time, steps = self.stats.steps, "simulation aborted");
        self.notify_hook(Hook::PostAbort);
    }

    // -----------------------------------------------------------------------
    // Observer dispatch (contained failures)
    // -----------------------------------------------------------------------

    fn notify_hook(&mut self, hook: Hook) {
        for listener in self.hooks.iter_mut() {
            if let Err(err) = listener.notify(hook) {
                tracing::warn!(?hook, error = %err, "hook listener failed");
            }
        }
    }

    fn notify_model_observers(&mut self, model: ModelId, info: &TransitionInfo) {
        let Some(observers) = self.model_observers.get_mut(model) else {
            return;
        };
        let name = self
            .tree
            .nodes
            .get(model)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| Name::from("?"));
        for obs in observers.iter_mut() {
            if let Err(err) = obs.update(&name, info) {
                tracing::warn!(model = %name, error = %err, "model observer failed");
            }
        }
    }
}

fn model_name(tree: &ModelTree, model: ModelId) -> Name {
    tree.name(model)
        .cloned()
        .unwrap_or_else(|| Name::from("?"))
}

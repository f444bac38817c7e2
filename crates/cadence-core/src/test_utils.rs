//! Shared test models for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so the same
//! reference models serve unit tests, integration tests, and benchmarks
//! (via the `test-utils` feature). Each model counts its own λ/δ calls so
//! tests can assert on the protocol from the model's point of view.

use crate::duration::Duration;
use crate::hierarchy::{ModelTree, OutputCollector};
use crate::id::ModelId;
use crate::message::{Bag, Value};
use crate::model::{AtomicModel, ModelError};
use crate::scale::Scale;
use crate::state::{StateSchema, StateSlot};

// ===========================================================================
// Generator: emits a value on `out` at a fixed period, a bounded number of
// times, then passivates.
// ===========================================================================

#[derive(Debug)]
pub struct Generator {
    pub period: Duration,
    pub payload: Value,
    /// Number of emissions before passivation.
    pub limit: u64,
    pub fired: u64,
    pub int_calls: u64,
    pub output_calls: u64,
}

impl Generator {
    pub fn new(period: Duration, payload: impl Into<Value>, limit: u64) -> Generator {
        Generator {
            period,
            payload: payload.into(),
            limit,
            fired: 0,
            int_calls: 0,
            output_calls: 0,
        }
    }
}

impl AtomicModel for Generator {
    fn precision(&self) -> Scale {
        self.period.precision()
    }

    fn time_advance(&self) -> Duration {
        if self.fired >= self.limit {
            Duration::INFINITY
        } else {
            self.period
        }
    }

    fn internal_transition(&mut self) -> Result<(), ModelError> {
        self.int_calls += 1;
        self.fired += 1;
        Ok(())
    }

    fn external_transition(&mut self, _elapsed: Duration, _bag: &Bag) -> Result<(), ModelError> {
        Ok(())
    }

    fn output(&mut self, collector: &mut OutputCollector<'_>) -> Result<(), ModelError> {
        self.output_calls += 1;
        collector.post_named(self.payload.clone(), "out")?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

// ===========================================================================
// Receiver: passive sink recording everything delivered on `in`.
// ===========================================================================

#[derive(Debug, Default)]
pub struct Receiver {
    pub received: Vec<Value>,
    pub elapsed_seen: Vec<Duration>,
    pub int_calls: u64,
    pub ext_calls: u64,
    pub con_calls: u64,
}

impl Receiver {
    pub fn new() -> Receiver {
        Receiver::default()
    }
}

impl AtomicModel for Receiver {
    fn time_advance(&self) -> Duration {
        Duration::INFINITY
    }

    fn internal_transition(&mut self) -> Result<(), ModelError> {
        self.int_calls += 1;
        Ok(())
    }

    fn external_transition(&mut self, elapsed: Duration, bag: &Bag) -> Result<(), ModelError> {
        self.ext_calls += 1;
        self.elapsed_seen.push(elapsed);
        self.received.extend(bag.values_on("in").iter().cloned());
        Ok(())
    }

    fn confluent_transition(&mut self, bag: &Bag) -> Result<(), ModelError> {
        self.con_calls += 1;
        self.received.extend(bag.values_on("in").iter().cloned());
        Ok(())
    }

    fn output(&mut self, _collector: &mut OutputCollector<'_>) -> Result<(), ModelError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

// ===========================================================================
// Buffer: forwards received values on `out` after a fixed hold time, one
// at a time, FIFO.
// ===========================================================================

#[derive(Debug)]
pub struct Buffer {
    pub hold: Duration,
    queue: std::collections::VecDeque<Value>,
    pub forwarded: u64,
}

impl Buffer {
    pub fn new(hold: Duration) -> Buffer {
        Buffer {
            hold,
            queue: std::collections::VecDeque::new(),
            forwarded: 0,
        }
    }
}

impl AtomicModel for Buffer {
    fn precision(&self) -> Scale {
        self.hold.precision()
    }

    fn time_advance(&self) -> Duration {
        if self.queue.is_empty() {
            Duration::INFINITY
        } else {
            self.hold
        }
    }

    fn internal_transition(&mut self) -> Result<(), ModelError> {
        self.queue.pop_front();
        self.forwarded += 1;
        Ok(())
    }

    fn external_transition(&mut self, _elapsed: Duration, bag: &Bag) -> Result<(), ModelError> {
        for value in bag.values_on("in") {
            self.queue.push_back(value.clone());
        }
        Ok(())
    }

    fn output(&mut self, collector: &mut OutputCollector<'_>) -> Result<(), ModelError> {
        if let Some(front) = self.queue.front() {
            collector.post_named(front.clone(), "out")?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

// ===========================================================================
// Cpu: stateful busy/idle server with a declarative state record. Serves
// one job at a time for a fixed service duration.
// ===========================================================================

#[derive(Debug)]
pub struct Cpu {
    pub service: Duration,
    state: StateSlot,
    pub completed: u64,
}

impl Cpu {
    pub fn new(service: Duration) -> Cpu {
        let schema = StateSchema::new("CpuState")
            .field("busy", false)
            .field("queued", 0i64);
        Cpu {
            service,
            state: StateSlot::new(&schema),
            completed: 0,
        }
    }

    fn busy(&self) -> bool {
        matches!(self.state.get().get("busy"), Some(Value::Bool(true)))
    }

    fn queued(&self) -> i64 {
        match self.state.get().get("queued") {
            Some(Value::Int(n)) => *n,
            _ => 0,
        }
    }
}

impl AtomicModel for Cpu {
    fn precision(&self) -> Scale {
        self.service.precision()
    }

    fn time_advance(&self) -> Duration {
        if self.busy() {
            self.service
        } else {
            Duration::INFINITY
        }
    }

    fn internal_transition(&mut self) -> Result<(), ModelError> {
        self.completed += 1;
        let pending = self.queued();
        if pending > 0 {
            self.state.get_mut().set("queued", pending - 1)?;
            self.state.get_mut().set("busy", true)?;
        } else {
            self.state.get_mut().set("busy", false)?;
        }
        Ok(())
    }

    fn external_transition(&mut self, _elapsed: Duration, bag: &Bag) -> Result<(), ModelError> {
        let arriving = bag.values_on("in").len() as i64;
        if self.busy() {
            let queued = self.queued();
            self.state.get_mut().set("queued", queued + arriving)?;
        } else {
            self.state.get_mut().set("busy", true)?;
            if arriving > 1 {
                let queued = self.queued();
                self.state.get_mut().set("queued", queued + arriving - 1)?;
            }
        }
        Ok(())
    }

    fn output(&mut self, collector: &mut OutputCollector<'_>) -> Result<(), ModelError> {
        collector.post_named(Value::from("done"), "out")?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

// ===========================================================================
// Tree builders
// ===========================================================================

/// Two generators fanned into one receiver as direct siblings:
/// `g1.out -> r.in`, `g2.out -> r.in`. Returns `(tree, g1, g2, r)`.
pub fn fanin_flat(
    period: Duration,
    limit: u64,
) -> (ModelTree, ModelId, ModelId, ModelId) {
    let mut tree = ModelTree::new("top");
    let g1 = tree
        .add_atomic(
            tree.root(),
            "g1",
            Box::new(Generator::new(period, "value", limit)),
        )
        .unwrap();
    let g2 = tree
        .add_atomic(
            tree.root(),
            "g2",
            Box::new(Generator::new(period, "value", limit)),
        )
        .unwrap();
    let r = tree.add_atomic(tree.root(), "r", Box::new(Receiver::new())).unwrap();

    let g1_out = tree.add_output_port(g1, "out").unwrap();
    let g2_out = tree.add_output_port(g2, "out").unwrap();
    let r_in = tree.add_input_port(r, "in").unwrap();

    tree.attach_internal(g1_out, r_in).unwrap();
    tree.attach_internal(g2_out, r_in).unwrap();
    (tree, g1, g2, r)
}

/// The same fan-in wrapped in two shells: `GEN = {g1, g2}` exposing `out`
/// through EOCs, `RECV = {r}` exposing `in` through an EIC, connected by a
/// single top-level IC. Returns `(tree, g1, g2, r)`.
pub fn fanin_nested(
    period: Duration,
    limit: u64,
) -> (ModelTree, ModelId, ModelId, ModelId) {
    let mut tree = ModelTree::new("top");
    let r#gen = tree.add_coupled(tree.root(), "gen").unwrap();
    let recv = tree.add_coupled(tree.root(), "recv").unwrap();

    let g1 = tree
        .add_atomic(r#gen, "g1", Box::new(Generator::new(period, "value", limit)))
        .unwrap();
    let g2 = tree
        .add_atomic(r#gen, "g2", Box::new(Generator::new(period, "value", limit)))
        .unwrap();
    let r = tree.add_atomic(recv, "r", Box::new(Receiver::new())).unwrap();

    let g1_out = tree.add_output_port(g1, "out").unwrap();
    let g2_out = tree.add_output_port(g2, "out").unwrap();
    let gen_out = tree.add_output_port(r#gen, "out").unwrap();
    let recv_in = tree.add_input_port(recv, "in").unwrap();
    let r_in = tree.add_input_port(r, "in").unwrap();

    tree.attach_output(g1_out, gen_out).unwrap();
    tree.attach_output(g2_out, gen_out).unwrap();
    tree.attach_internal(gen_out, recv_in).unwrap();
    tree.attach_input(recv_in, r_in).unwrap();
    (tree, g1, g2, r)
}

/// Mixed-precision pipeline: micro-scale generator and buffer feeding a
/// nano-scale CPU. Returns `(tree, generator, buffer, cpu)`.
pub fn pipeline_mixed_precision(
    jobs: u64,
    service: Duration,
) -> (ModelTree, ModelId, ModelId, ModelId) {
    let mut tree = ModelTree::new("pipeline");
    let generator = tree
        .add_atomic(
            tree.root(),
            "generator",
            Box::new(Generator::new(
                Duration::new(1_000_000.0, Scale::MICRO),
                "job",
                jobs,
            )),
        )
        .unwrap();
    let buffer = tree
        .add_atomic(
            tree.root(),
            "buffer",
            Box::new(Buffer::new(Duration::new(500_000.0, Scale::MICRO))),
        )
        .unwrap();
    let cpu = tree
        .add_atomic(tree.root(), "cpu", Box::new(Cpu::new(service)))
        .unwrap();

    let gen_out = tree.add_output_port(generator, "out").unwrap();
    let buf_in = tree.add_input_port(buffer, "in").unwrap();
    let buf_out = tree.add_output_port(buffer, "out").unwrap();
    let cpu_in = tree.add_input_port(cpu, "in").unwrap();
    tree.add_output_port(cpu, "out").unwrap();

    tree.attach_internal(gen_out, buf_in).unwrap();
    tree.attach_internal(buf_out, cpu_in).unwrap();
    (tree, generator, buffer, cpu)
}

/// Downcast helper for post-run inspection.
pub fn inspect<'a, T: 'static>(
    sim: &'a crate::simulation::Simulation,
    model: ModelId,
) -> &'a T {
    sim.behavior(model)
        .and_then(|b| b.as_any().downcast_ref::<T>())
        .expect("model has the expected behavior type")
}

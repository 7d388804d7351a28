//! ECS system scheduling and execution.
//!
//! This module is responsible for:
//! * turning registered systems plus explicit ordering into execution stages,
//! * running the systems of a stage concurrently using Rayon,
//! * enforcing structural synchronization points between stages.
//!
//! ## Scheduling model
//!
//! [`Scheduler::build`] derives a dependency graph:
//! * explicit edges come from [`Scheduler::order`],
//! * implicit edges connect every conflicting pair of systems, pointing from
//!   the one declared first to the one declared later.
//!
//! An explicit edge that runs against the declaration order of a conflicting
//! pair closes a cycle. Any cycle in the combined graph is rejected with
//! [`ScheduleError::Cycle`] before anything runs.
//!
//! Stages are then packed greedily: a system is ready once each of its
//! dependencies sits in an earlier stage, and a ready system joins the current
//! stage unless it conflicts with a system already chosen for it. As a result:
//! * systems within the same stage do **not** conflict on component access,
//! * systems joined by an edge land in strictly increasing stages,
//! * every system lands in exactly one stage.
//!
//! The partition is computed once for all systems and once per [`Phase`].
//!
//! ## Structural synchronization
//!
//! Deferred ECS commands (spawns, despawns, component additions and
//! removals) are applied:
//! * **before** each stage begins,
//! * **after** each stage completes.
//!
//! ## Failure
//!
//! A system that returns an error or panics does not interrupt its siblings.
//! Once every system of the stage has finished, the first failure in
//! declaration order is returned and later stages do not run.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use tracing::{debug_span, error, info, warn};

use crate::engine::config::SchedulerConfig;
use crate::engine::error::{ECSResult, ExecutionError, ScheduleError};
use crate::engine::systems::{FnSystem, Phase, System, SystemContext};
use crate::engine::types::{AccessSets, SystemID};
use crate::engine::world::World;


struct Registered {
    system: Box<dyn System>,
    name: String,
    access: AccessSets,
    phase: Phase,
}

/// A group of systems that can be executed in parallel.
///
/// ## Invariants
/// * All systems within a `Stage` have **non-conflicting access sets**
/// * Systems are listed in dependency order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stage {
    systems: Vec<SystemID>,
}

impl Stage {
    /// Ids of the systems in this stage.
    pub fn systems(&self) -> &[SystemID] {
        &self.systems
    }

    /// Number of systems in this stage.
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Returns `true` if the stage holds no system.
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

#[derive(Default)]
struct Plan {
    all: Vec<Stage>,
    by_phase: BTreeMap<Phase, Vec<Stage>>,
}

// ───────────────────────────────────────────── Shutdown ─────────────────────

struct Gate {
    accepting: bool,
    in_flight: usize,
}

struct ShutdownState {
    gate: Mutex<Gate>,
    drained: Condvar,
}

impl ShutdownState {
    fn new() -> Self {
        Self { gate: Mutex::new(Gate { accepting: true, in_flight: 0 }), drained: Condvar::new() }
    }

    fn is_accepting(&self) -> bool {
        self.gate.lock().accepting
    }

    /// Admits one stage, unless shutdown has begun.
    fn enter(&self) -> Result<InFlight<'_>, ExecutionError> {
        let mut gate = self.gate.lock();
        if !gate.accepting {
            return Err(ExecutionError::ShutDown);
        }
        gate.in_flight += 1;
        Ok(InFlight(self))
    }
}

struct InFlight<'a>(&'a ShutdownState);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut gate = self.0.gate.lock();
        gate.in_flight -= 1;
        if gate.in_flight == 0 {
            self.0.drained.notify_all();
        }
    }
}

/// Handle used to stop a scheduler, possibly from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<ShutdownState>,
}

impl ShutdownHandle {
    /// Stops accepting new stages and waits up to `timeout` for the stage in
    /// flight to finish.
    ///
    /// Returns `true` if nothing was running when the call returned.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        let mut gate = self.state.gate.lock();
        gate.accepting = false;
        while gate.in_flight > 0 {
            if self.state.drained.wait_until(&mut gate, deadline).timed_out() {
                break;
            }
        }

        let drained = gate.in_flight == 0;
        if drained {
            info!("scheduler shut down");
        } else {
            warn!(in_flight = gate.in_flight, ?timeout, "scheduler shutdown timed out");
        }
        drained
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        !self.state.is_accepting()
    }
}

// ───────────────────────────────────────────── Scheduler ────────────────────

/// Builds and runs staged schedules over a [`World`].
pub struct Scheduler {
    config: SchedulerConfig,
    systems: Vec<Registered>,
    names: HashMap<String, SystemID>,
    explicit: Vec<(SystemID, SystemID)>,
    plan: Option<Plan>,
    pool: Option<rayon::ThreadPool>,
    shutdown: Arc<ShutdownState>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Parallel scheduler running on the global Rayon pool.
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            systems: Vec::new(),
            names: HashMap::new(),
            explicit: Vec::new(),
            plan: None,
            pool: None,
            shutdown: Arc::new(ShutdownState::new()),
        }
    }

    /// Scheduler with explicit configuration.
    ///
    /// A dedicated pool is created when `worker_threads` is set.
    pub fn with_config(config: SchedulerConfig) -> ECSResult<Self> {
        let pool = match config.worker_threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|index| format!("ecs-worker-{index}"))
                    .build()
                    .map_err(|e| ExecutionError::ThreadPool { message: e.to_string() })?,
            ),
            None => None,
        };
        Ok(Self { config, pool, ..Self::new() })
    }

    /// Active configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Registers a system, returning its id.
    ///
    /// Invalidates any previously built schedule.
    pub fn add_system(&mut self, system: impl System + 'static) -> ECSResult<SystemID> {
        let name = system.name().to_owned();
        if self.names.contains_key(&name) {
            return Err(ScheduleError::DuplicateSystemName { name }.into());
        }
        let id = self.systems.len();
        let access = system.access();
        let phase = system.phase();
        self.names.insert(name.clone(), id);
        self.systems.push(Registered { system: Box::new(system), name, access, phase });
        self.plan = None;
        Ok(id)
    }

    /// Registers a closure as a system.
    pub fn add_fn<F>(
        &mut self,
        name: impl Into<String>,
        access: AccessSets,
        phase: Phase,
        f: F,
    ) -> ECSResult<SystemID>
    where
        F: Fn(&SystemContext<'_>) -> ECSResult<()> + Send + Sync + 'static,
    {
        self.add_system(FnSystem::new(name, access, f).in_phase(phase))
    }

    /// Requires `before` to run in an earlier stage than `after`.
    pub fn order(&mut self, before: &str, after: &str) -> ECSResult<()> {
        let before = self.lookup(before)?;
        let after = self.lookup(after)?;
        self.explicit.push((before, after));
        self.plan = None;
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<SystemID, ScheduleError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| ScheduleError::UnknownSystem { name: name.to_owned() })
    }

    /// Number of registered systems.
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Returns `true` if no system is registered.
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Name of system `id`.
    pub fn system_name(&self, id: SystemID) -> Option<&str> {
        self.systems.get(id).map(|entry| entry.name.as_str())
    }

    /// Id of the system called `name`.
    pub fn system_id(&self, name: &str) -> Option<SystemID> {
        self.names.get(name).copied()
    }

    /// Returns `true` once [`build`](Self::build) has succeeded and no system
    /// or ordering was added since.
    pub fn is_built(&self) -> bool {
        self.plan.is_some()
    }

    /// Returns a handle that can stop this scheduler.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { state: Arc::clone(&self.shutdown) }
    }

    // ─── Build ──────────────────────────────────────────────────────────────

    /// Validates the ordering graph and computes every stage partition.
    ///
    /// Fails with [`ScheduleError::Cycle`] when explicit ordering, together with
    /// the conflict edges, is cyclic; no plan is stored in that case.
    pub fn build(&mut self) -> ECSResult<()> {
        self.plan = None;

        let successors = self.successors();
        if let Some(cycle) = self.find_cycle(&successors) {
            let path: Vec<String> = cycle.iter().map(|&id| self.systems[id].name.clone()).collect();
            error!(cycle = %path.join(" -> "), "schedule rejected");
            return Err(ScheduleError::Cycle { path }.into());
        }

        let every: Vec<SystemID> = (0..self.systems.len()).collect();
        let all = self.partition(&every, &successors)?;

        let mut by_phase = BTreeMap::new();
        for phase in Phase::ALL {
            let members: Vec<SystemID> =
                every.iter().copied().filter(|&id| self.systems[id].phase == phase).collect();
            by_phase.insert(phase, self.partition(&members, &successors)?);
        }

        info!(
            systems = self.systems.len(),
            explicit_edges = self.explicit.len(),
            stages = all.len(),
            "schedule built"
        );
        self.plan = Some(Plan { all, by_phase });
        Ok(())
    }

    /// Stage partition over every system.
    pub fn stages(&self) -> ECSResult<&[Stage]> {
        Ok(&self.plan()?.all)
    }

    /// Stage partition over the systems of `phase`.
    pub fn stages_for(&self, phase: Phase) -> ECSResult<&[Stage]> {
        Ok(self.plan()?.by_phase.get(&phase).map(Vec::as_slice).unwrap_or(&[]))
    }

    fn plan(&self) -> Result<&Plan, ScheduleError> {
        self.plan.as_ref().ok_or(ScheduleError::NotBuilt)
    }

    fn conflicts(&self, a: SystemID, b: SystemID) -> bool {
        self.systems[a].access.conflicts_with(&self.systems[b].access)
    }

    /// Explicit edges merged with conflict edges, the latter pointing from the
    /// earlier declared system to the later one.
    fn successors(&self) -> Vec<Vec<SystemID>> {
        let mut successors = vec![Vec::new(); self.systems.len()];
        for &(before, after) in &self.explicit {
            successors[before].push(after);
        }
        for later in 0..self.systems.len() {
            for earlier in 0..later {
                if self.conflicts(earlier, later) {
                    successors[earlier].push(later);
                }
            }
        }
        for next in successors.iter_mut() {
            next.sort_unstable();
            next.dedup();
        }
        successors
    }

    /// Depth-first search over the dependency graph. Returns the first cycle found,
    /// beginning and ending with the same system.
    fn find_cycle(&self, successors: &[Vec<SystemID>]) -> Option<Vec<SystemID>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(
            node: SystemID,
            successors: &[Vec<SystemID>],
            marks: &mut [Mark],
            stack: &mut Vec<SystemID>,
        ) -> Option<Vec<SystemID>> {
            marks[node] = Mark::Active;
            stack.push(node);
            for &next in &successors[node] {
                match marks[next] {
                    Mark::Active => {
                        let start = stack.iter().position(|&s| s == next).unwrap_or(0);
                        let mut cycle = stack[start..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Mark::New => {
                        if let Some(cycle) = visit(next, successors, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            stack.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::New; self.systems.len()];
        let mut stack = Vec::new();
        for node in 0..self.systems.len() {
            if marks[node] == Mark::New {
                if let Some(cycle) = visit(node, successors, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Topological order of `units` under the edges between them, ties broken
    /// by declaration order.
    fn topological_order(&self, units: &[SystemID], successors: &[Vec<SystemID>]) -> Vec<SystemID> {
        let members: BTreeSet<SystemID> = units.iter().copied().collect();

        let mut indegree: HashMap<SystemID, usize> = units.iter().map(|&id| (id, 0)).collect();
        for &id in units {
            for next in successors[id].iter().filter(|next| members.contains(next)) {
                *indegree.entry(*next).or_default() += 1;
            }
        }

        let mut ready: BTreeSet<SystemID> =
            units.iter().copied().filter(|id| indegree.get(id) == Some(&0)).collect();
        let mut order = Vec::with_capacity(units.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for &next in successors[id].iter().filter(|next| members.contains(next)) {
                if let Some(degree) = indegree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(next);
                    }
                }
            }
        }
        order
    }

    /// Greedy stage packing over `units`.
    fn partition(
        &self,
        units: &[SystemID],
        successors: &[Vec<SystemID>],
    ) -> Result<Vec<Stage>, ScheduleError> {
        let order = self.topological_order(units, successors);
        if order.len() != units.len() {
            let path = units
                .iter()
                .filter(|id| !order.contains(id))
                .map(|&id| self.systems[id].name.clone())
                .collect();
            return Err(ScheduleError::Cycle { path });
        }

        let members: BTreeSet<SystemID> = units.iter().copied().collect();
        let mut dependencies: HashMap<SystemID, Vec<SystemID>> =
            order.iter().map(|&id| (id, Vec::new())).collect();
        for &before in &order {
            for next in successors[before].iter().filter(|next| members.contains(next)) {
                if let Some(deps) = dependencies.get_mut(next) {
                    deps.push(before);
                }
            }
        }

        let mut placed: HashMap<SystemID, usize> = HashMap::new();
        let mut remaining = order;
        let mut stages = Vec::new();

        while !remaining.is_empty() {
            let current = stages.len();
            let mut chosen: Vec<SystemID> = Vec::new();
            let mut deferred = Vec::new();

            for id in remaining {
                let ready = dependencies
                    .get(&id)
                    .map(|deps| deps.iter().all(|dep| placed.get(dep).is_some_and(|&s| s < current)))
                    .unwrap_or(true);
                let clashes = chosen.iter().any(|&other| self.conflicts(other, id));
                if ready && !clashes {
                    chosen.push(id);
                } else {
                    deferred.push(id);
                }
            }

            if chosen.is_empty() {
                let path = deferred.iter().map(|&id| self.systems[id].name.clone()).collect();
                return Err(ScheduleError::Cycle { path });
            }
            for &id in &chosen {
                placed.insert(id, current);
            }
            stages.push(Stage { systems: chosen });
            remaining = deferred;
        }
        Ok(stages)
    }

    // ─── Execute ────────────────────────────────────────────────────────────

    /// Runs every stage of the full partition once.
    pub fn execute(&self, world: &mut World) -> ECSResult<()> {
        let plan = self.plan()?;
        self.run_stages(world, &plan.all)
    }

    /// Runs the stages computed for the systems of `phase`.
    pub fn execute_phase(&self, world: &mut World, phase: Phase) -> ECSResult<()> {
        let plan = self.plan()?;
        match plan.by_phase.get(&phase) {
            Some(stages) => self.run_stages(world, stages),
            None => Ok(()),
        }
    }

    fn run_stages(&self, world: &mut World, stages: &[Stage]) -> ECSResult<()> {
        for (index, stage) in stages.iter().enumerate() {
            // Covers both command barriers as well as the stage itself.
            let _in_flight = self.shutdown.enter()?;

            world.apply_deferred_commands()?;

            let mut outcomes = {
                let _span = debug_span!("stage", index, systems = stage.len()).entered();
                self.run_stage(world, stage)
            };

            outcomes.sort_by_key(|(id, _)| *id);
            if let Some((_, Err(failure))) = outcomes.into_iter().find(|(_, outcome)| outcome.is_err()) {
                return Err(failure.into());
            }

            world.apply_deferred_commands()?;
        }
        Ok(())
    }

    fn run_stage(&self, world: &World, stage: &Stage) -> Vec<(SystemID, Result<(), ExecutionError>)> {
        let run = |id: &SystemID| (*id, self.run_system(world, *id));

        if !self.config.parallel || stage.len() < 2 {
            return stage.systems.iter().map(run).collect();
        }
        match &self.pool {
            Some(pool) => pool.install(|| stage.systems.par_iter().map(run).collect()),
            None => stage.systems.par_iter().map(run).collect(),
        }
    }

    fn run_system(&self, world: &World, id: SystemID) -> Result<(), ExecutionError> {
        let entry = &self.systems[id];
        let ctx = SystemContext::new(world, &entry.name);

        match panic::catch_unwind(AssertUnwindSafe(|| entry.system.run(&ctx))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => {
                error!(system = %entry.name, error = %source, "system failed");
                Err(ExecutionError::SystemFailed { system: entry.name.clone(), source: Box::new(source) })
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(system = %entry.name, %message, "system panicked");
                Err(ExecutionError::SystemPanicked { system: entry.name.clone(), message })
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

//! Error types for storage, queries and scheduling.
//!
//! Every failure mode of the engine is modelled by a small, focused enum. Each
//! carries enough context (entity handles, component names, slot indices,
//! system names) to make the failure actionable from a log line alone.
//!
//! ## Families
//! * [`StructuralError`]: misuse of the entity/component API. Reported
//!   synchronously and never retried.
//! * [`FieldError`]: failure while moving a component in or out of its
//!   primitive field columns.
//! * [`AccessError`]: bounds or locking failures on column cursors.
//! * [`ScheduleError`]: invalid scheduler configuration, detected at build
//!   time before any system runs.
//! * [`ExecutionError`]: a system failed or panicked while a schedule ran.
//!
//! All of them convert into the aggregate [`ECSError`] through `From`, so
//! higher layers bubble failures with `?` and callers match on the family they
//! care about.
//!
//! ```ignore
//! match world.add_component(entity, Velocity::default()) {
//!     Ok(()) => {}
//!     Err(ECSError::Structural(StructuralError::ComponentAlreadyPresent { component, .. })) => {
//!         tracing::warn!(component, "velocity already attached");
//!     }
//!     Err(other) => return Err(other),
//! }
//! ```

use thiserror::Error;

use crate::engine::entity::Entity;
use crate::engine::primitive::PrimitiveKind;
use crate::engine::types::{ComponentID, SlotID};


/// Misuse of the entity/component API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    /// A spawn bundle listed the same component type twice.
    #[error("component `{component}` appears more than once in the bundle")]
    DuplicateComponent {
        /// Name of the repeated type.
        component: &'static str,
    },

    /// `add_component` targeted a type the entity already carries.
    #[error("entity {entity} already has component `{component}`")]
    ComponentAlreadyPresent {
        /// Target entity.
        entity: Entity,
        /// Name of the component type.
        component: &'static str,
    },

    /// A read, write or removal targeted a type the entity does not carry.
    #[error("entity {entity} has no component `{component}`")]
    MissingComponent {
        /// Target entity.
        entity: Entity,
        /// Name of the component type.
        component: &'static str,
    },

    /// The handle does not refer to a live entity (never issued or already
    /// destroyed).
    #[error("entity {entity} does not exist")]
    NoSuchEntity {
        /// The stale or unknown handle.
        entity: Entity,
    },

    /// The entity is live but is not stored in the archetype addressed.
    #[error("entity {entity} is not stored in archetype {archetype}")]
    EntityNotInArchetype {
        /// Target entity.
        entity: Entity,
        /// Archetype index.
        archetype: u32,
    },

    /// The entity is already stored in the archetype it is being added to.
    #[error("entity {entity} is already stored in archetype {archetype}")]
    EntityAlreadyPresent {
        /// Target entity.
        entity: Entity,
        /// Archetype index.
        archetype: u32,
    },

    /// A component type was used before being registered with the world.
    #[error("component `{component}` is not registered")]
    UnregisteredComponent {
        /// Name of the type.
        component: &'static str,
    },

    /// The world only stores decomposable types and this one is not.
    #[error("component `{component}` has no primitive field decomposition")]
    UnsupportedFieldShape {
        /// Name of the type.
        component: &'static str,
    },

    /// The component map handed to an archetype does not match its composition.
    #[error("component set {found:?} does not match archetype composition {expected:?}")]
    CompositionMismatch {
        /// Composition of the archetype.
        expected: Vec<ComponentID>,
        /// Keys of the supplied map.
        found: Vec<ComponentID>,
    },

    /// The registry ran out of component ids.
    #[error("cannot register more than {capacity} component types")]
    ComponentCapacity {
        /// Fixed registry capacity.
        capacity: usize,
    },

    /// The entity allocator ran out of ids.
    #[error("entity id space exhausted")]
    EntityCapacity,

    /// A configuration value was rejected.
    #[error("invalid world configuration: {reason}")]
    InvalidConfig {
        /// Which value was rejected and why.
        reason: String,
    },
}

/// Failure while moving a component through its primitive field columns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// More fields were written or read than the type declares.
    #[error("component `{component}` declares only {declared} fields")]
    Exhausted {
        /// Name of the component type.
        component: &'static str,
        /// Number of declared fields.
        declared: usize,
    },

    /// A field was accessed with a different primitive kind than declared.
    #[error("field `{field}` holds {declared:?} but was accessed as {requested:?}")]
    KindMismatch {
        /// Field name.
        field: &'static str,
        /// Declared kind.
        declared: PrimitiveKind,
        /// Kind requested by the accessor.
        requested: PrimitiveKind,
    },

    /// Fewer fields were written than the type declares.
    #[error("component `{component}` wrote {written} of {declared} fields")]
    Incomplete {
        /// Name of the component type.
        component: &'static str,
        /// Fields written.
        written: usize,
        /// Fields declared.
        declared: usize,
    },

    /// A field cell index fell outside its shared array.
    #[error("field `{field}` has no cell at index {index}")]
    CellOutOfRange {
        /// Field name.
        field: &'static str,
        /// Cell index inside the shared array.
        index: usize,
    },

    /// An erased value did not have the expected Rust type.
    #[error("expected a value of type `{expected}`")]
    ValueType {
        /// Expected type name.
        expected: &'static str,
    },
}

/// Bounds and locking failures on column cursors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// A cursor was addressed outside `0..len`.
    #[error("slot {slot} is out of bounds for {len} entities")]
    SlotOutOfBounds {
        /// Requested slot.
        slot: SlotID,
        /// Number of live slots.
        len: usize,
    },

    /// The column is already locked in an incompatible mode.
    ///
    /// Under a correctly declared schedule this never happens; it signals an
    /// undeclared read/write overlap.
    #[error("column `{component}` is busy")]
    ColumnBusy {
        /// Name of the component type.
        component: &'static str,
    },

    /// A query asked to read and write the same component type.
    #[error("component `{component}` is both read and written by one query")]
    ReadWriteOverlap {
        /// Name of the component type.
        component: &'static str,
    },

    /// A typed cursor was requested for a column of another type.
    #[error("column does not hold values of type `{expected}`")]
    TypeMismatch {
        /// Requested type name.
        expected: &'static str,
    },
}

/// Invalid scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Explicit ordering constraints form a cycle. `path` lists the systems on
    /// the cycle, starting and ending with the same name.
    #[error("ordering cycle: {}", path.join(" -> "))]
    Cycle {
        /// System names along the cycle.
        path: Vec<String>,
    },

    /// An ordering constraint named a system that was never added.
    #[error("unknown system `{name}`")]
    UnknownSystem {
        /// The missing name.
        name: String,
    },

    /// Two systems were added under the same name.
    #[error("system `{name}` is already registered")]
    DuplicateSystemName {
        /// The repeated name.
        name: String,
    },

    /// `execute` was called without a successful `build`.
    #[error("the schedule has not been built")]
    NotBuilt,
}

/// Failure while running a built schedule.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A system returned an error.
    #[error("system `{system}` failed: {source}")]
    SystemFailed {
        /// Name of the failing system.
        system: String,
        /// The error it returned.
        source: Box<ECSError>,
    },

    /// A system panicked.
    #[error("system `{system}` panicked: {message}")]
    SystemPanicked {
        /// Name of the panicking system.
        system: String,
        /// Panic payload rendered as text.
        message: String,
    },

    /// The scheduler was shut down and no longer accepts work.
    #[error("the scheduler has been shut down")]
    ShutDown,

    /// The dedicated worker pool could not be created.
    #[error("failed to build worker pool: {message}")]
    ThreadPool {
        /// Error reported by the pool builder.
        message: String,
    },
}

/// Aggregate error type returned by the public API.
#[derive(Debug, Error)]
pub enum ECSError {
    /// See [`StructuralError`].
    #[error(transparent)]
    Structural(#[from] StructuralError),
    /// See [`FieldError`].
    #[error(transparent)]
    Field(#[from] FieldError),
    /// See [`AccessError`].
    #[error(transparent)]
    Access(#[from] AccessError),
    /// See [`ScheduleError`].
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    /// See [`ExecutionError`].
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Result alias used across the engine.
pub type ECSResult<T> = Result<T, ECSError>;

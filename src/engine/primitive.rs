//! Primitive field decomposition.
//!
//! In the decomposed storage variant an archetype does not keep one boxed
//! column per component type. Instead it owns one **shared primitive array**
//! per primitive kind, and every field of every decomposable component type is
//! assigned a **field column**: the sub-range `[offset, offset + capacity)` of
//! the shared array for that field's kind.
//!
//! ```text
//! f32 array:  | Position.x (cap) | Position.y (cap) | Velocity.dx (cap) | ...
//! i32 array:  | Health.hp  (cap) | ...
//! ```
//!
//! ## Layout
//!
//! Each field column has an `ordinal` among the columns of its kind. Its
//! offset is `ordinal * capacity`, so growing the archetype relocates every
//! column: the arrays are rebuilt at the new capacity and live cells are moved
//! to their new offsets.
//!
//! ## Memory ordering
//!
//! Cells are atomics. Loads use [`Ordering::Relaxed`]; stores use
//! [`Ordering::Release`]. String cells sit behind a per-cell lock. The
//! scheduler's conflict discipline guarantees no unit reads a cell another
//! unit of the same stage writes, so these orderings only need to make values
//! visible across the stage barrier.
//!
//! ## Decomposable types
//!
//! A component qualifies when it implements [`Decompose`]: a compile-time
//! accessor table listing its fields in declaration order, plus functions that
//! push fields into a [`FieldSink`] and rebuild the value from a
//! [`FieldSource`]. The [`decomposable!`](crate::decomposable) macro derives the
//! table for plain structs whose fields are all [`Primitive`].

use std::ops::Range;
use std::sync::atomic::{
    AtomicBool, AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicU32, AtomicU64, Ordering,
};

use parking_lot::RwLock;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::error::FieldError;


/// Primitive kinds a decomposed field may have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PrimitiveKind {
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// `bool`
    Bool,
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `char`
    Char,
    /// `String`
    Str,
}

impl PrimitiveKind {
    /// Number of kinds.
    pub const COUNT: usize = 9;

    /// Every kind, in index order.
    pub const ALL: [PrimitiveKind; Self::COUNT] = [
        PrimitiveKind::I32,
        PrimitiveKind::I64,
        PrimitiveKind::F32,
        PrimitiveKind::F64,
        PrimitiveKind::Bool,
        PrimitiveKind::I8,
        PrimitiveKind::I16,
        PrimitiveKind::Char,
        PrimitiveKind::Str,
    ];

    /// Position of this kind in [`PrimitiveKind::ALL`].
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// One shared primitive array.
///
/// Float kinds are stored as their bit patterns and `char` as its scalar
/// value, so every non-string kind is a plain atomic integer.
#[derive(Debug)]
pub enum PrimitiveArray {
    /// `i32` cells.
    I32(Vec<AtomicI32>),
    /// `i64` cells.
    I64(Vec<AtomicI64>),
    /// `f32` cells, as bits.
    F32(Vec<AtomicU32>),
    /// `f64` cells, as bits.
    F64(Vec<AtomicU64>),
    /// `bool` cells.
    Bool(Vec<AtomicBool>),
    /// `i8` cells.
    I8(Vec<AtomicI8>),
    /// `i16` cells.
    I16(Vec<AtomicI16>),
    /// `char` cells, as scalar values.
    Char(Vec<AtomicU32>),
    /// `String` cells.
    Str(Vec<RwLock<String>>),
}

fn cells<T>(len: usize, make: impl Fn() -> T) -> Vec<T> {
    (0..len).map(|_| make()).collect()
}

impl PrimitiveArray {
    /// Creates an array of `len` default-valued cells of `kind`.
    pub fn with_len(kind: PrimitiveKind, len: usize) -> Self {
        match kind {
            PrimitiveKind::I32 => Self::I32(cells(len, || AtomicI32::new(0))),
            PrimitiveKind::I64 => Self::I64(cells(len, || AtomicI64::new(0))),
            PrimitiveKind::F32 => Self::F32(cells(len, || AtomicU32::new(0))),
            PrimitiveKind::F64 => Self::F64(cells(len, || AtomicU64::new(0))),
            PrimitiveKind::Bool => Self::Bool(cells(len, || AtomicBool::new(false))),
            PrimitiveKind::I8 => Self::I8(cells(len, || AtomicI8::new(0))),
            PrimitiveKind::I16 => Self::I16(cells(len, || AtomicI16::new(0))),
            PrimitiveKind::Char => Self::Char(cells(len, || AtomicU32::new(0))),
            PrimitiveKind::Str => Self::Str(cells(len, || RwLock::new(String::new()))),
        }
    }

    /// Kind of the cells.
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Self::I32(_) => PrimitiveKind::I32,
            Self::I64(_) => PrimitiveKind::I64,
            Self::F32(_) => PrimitiveKind::F32,
            Self::F64(_) => PrimitiveKind::F64,
            Self::Bool(_) => PrimitiveKind::Bool,
            Self::I8(_) => PrimitiveKind::I8,
            Self::I16(_) => PrimitiveKind::I16,
            Self::Char(_) => PrimitiveKind::Char,
            Self::Str(_) => PrimitiveKind::Str,
        }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        match self {
            Self::I32(c) => c.len(),
            Self::I64(c) => c.len(),
            Self::F32(c) => c.len(),
            Self::F64(c) => c.len(),
            Self::Bool(c) => c.len(),
            Self::I8(c) => c.len(),
            Self::I16(c) => c.len(),
            Self::Char(c) => c.len(),
            Self::Str(c) => c.len(),
        }
    }

    /// Returns `true` if the array has no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves the value of cell `from` into cell `to` of `dst`.
    ///
    /// String cells are taken, leaving the source empty. Returns `false` if
    /// the kinds differ or an index is out of range.
    fn move_cell(&self, from: usize, dst: &PrimitiveArray, to: usize) -> bool {
        macro_rules! atomic_move {
            ($src:expr, $dst:expr) => {
                match ($src.get(from), $dst.get(to)) {
                    (Some(s), Some(d)) => {
                        d.store(s.load(Ordering::Relaxed), Ordering::Release);
                        true
                    }
                    _ => false,
                }
            };
        }

        match (self, dst) {
            (Self::I32(s), Self::I32(d)) => atomic_move!(s, d),
            (Self::I64(s), Self::I64(d)) => atomic_move!(s, d),
            (Self::F32(s), Self::F32(d)) => atomic_move!(s, d),
            (Self::F64(s), Self::F64(d)) => atomic_move!(s, d),
            (Self::Bool(s), Self::Bool(d)) => atomic_move!(s, d),
            (Self::I8(s), Self::I8(d)) => atomic_move!(s, d),
            (Self::I16(s), Self::I16(d)) => atomic_move!(s, d),
            (Self::Char(s), Self::Char(d)) => atomic_move!(s, d),
            (Self::Str(s), Self::Str(d)) => match (s.get(from), d.get(to)) {
                (Some(source), Some(target)) => {
                    let value = std::mem::take(&mut *source.write());
                    *target.write() = value;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Releases heap data held by cell `index`. Only string cells hold any.
    fn clear_cell(&self, index: usize) {
        if let Self::Str(c) = self {
            if let Some(cell) = c.get(index) {
                cell.write().clear();
            }
        }
    }
}

/// A value storable in a shared primitive array.
pub trait Primitive: Sized + Send + Sync + 'static {
    /// Kind of array the value lives in.
    const KIND: PrimitiveKind;

    /// Loads cell `index`. `None` if the array has another kind or the index
    /// is out of range.
    fn load(array: &PrimitiveArray, index: usize) -> Option<Self>;

    /// Stores into cell `index`. `false` if the array has another kind or the
    /// index is out of range.
    fn store(self, array: &PrimitiveArray, index: usize) -> bool;
}

macro_rules! atomic_primitive {
    ($ty:ty, $variant:ident, $encode:expr, $decode:expr) => {
        impl Primitive for $ty {
            const KIND: PrimitiveKind = PrimitiveKind::$variant;

            #[inline]
            fn load(array: &PrimitiveArray, index: usize) -> Option<Self> {
                match array {
                    PrimitiveArray::$variant(cells) => cells
                        .get(index)
                        .map(|cell| ($decode)(cell.load(Ordering::Relaxed))),
                    _ => None,
                }
            }

            #[inline]
            fn store(self, array: &PrimitiveArray, index: usize) -> bool {
                match array {
                    PrimitiveArray::$variant(cells) => match cells.get(index) {
                        Some(cell) => {
                            cell.store(($encode)(self), Ordering::Release);
                            true
                        }
                        None => false,
                    },
                    _ => false,
                }
            }
        }
    };
}

atomic_primitive!(i32, I32, |v: i32| v, |raw: i32| raw);
atomic_primitive!(i64, I64, |v: i64| v, |raw: i64| raw);
atomic_primitive!(f32, F32, f32::to_bits, f32::from_bits);
atomic_primitive!(f64, F64, f64::to_bits, f64::from_bits);
atomic_primitive!(bool, Bool, |v: bool| v, |raw: bool| raw);
atomic_primitive!(i8, I8, |v: i8| v, |raw: i8| raw);
atomic_primitive!(i16, I16, |v: i16| v, |raw: i16| raw);
atomic_primitive!(
    char,
    Char,
    |v: char| v as u32,
    |raw: u32| char::from_u32(raw).unwrap_or('\0')
);

impl Primitive for String {
    const KIND: PrimitiveKind = PrimitiveKind::Str;

    fn load(array: &PrimitiveArray, index: usize) -> Option<Self> {
        match array {
            PrimitiveArray::Str(cells) => cells.get(index).map(|cell| cell.read().clone()),
            _ => None,
        }
    }

    fn store(self, array: &PrimitiveArray, index: usize) -> bool {
        match array {
            PrimitiveArray::Str(cells) => match cells.get(index) {
                Some(cell) => {
                    *cell.write() = self;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

/// Declared field of a decomposable component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDesc {
    /// Field name.
    pub name: &'static str,
    /// Primitive kind of the field.
    pub kind: PrimitiveKind,
}

/// Placement of one field inside an archetype's shared arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldColumn {
    /// Field name.
    pub name: &'static str,
    /// Kind of the shared array holding the column.
    pub kind: PrimitiveKind,
    /// Position among the columns of the same kind.
    pub ordinal: usize,
}

impl FieldColumn {
    /// First cell of the column for the given archetype capacity.
    #[inline]
    pub fn offset(&self, capacity: usize) -> usize {
        self.ordinal * capacity
    }

    /// Cell range owned by the column.
    #[inline]
    pub fn range(&self, capacity: usize) -> Range<usize> {
        let offset = self.offset(capacity);
        offset..offset + capacity
    }
}

/// The shared primitive arrays of one archetype.
#[derive(Debug)]
pub struct PrimitiveArrays {
    arrays: Vec<PrimitiveArray>,
    columns_per_kind: [usize; PrimitiveKind::COUNT],
    capacity: usize,
}

impl PrimitiveArrays {
    /// Creates empty arrays sized for `capacity` slots per column.
    pub fn new(capacity: usize) -> Self {
        Self {
            arrays: PrimitiveKind::ALL
                .iter()
                .map(|&kind| PrimitiveArray::with_len(kind, 0))
                .collect(),
            columns_per_kind: [0; PrimitiveKind::COUNT],
            capacity,
        }
    }

    /// Slots per column.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of field columns of `kind`.
    #[inline]
    pub fn columns_of(&self, kind: PrimitiveKind) -> usize {
        self.columns_per_kind[kind.index()]
    }

    /// Shared array for `kind`.
    #[inline]
    pub fn array(&self, kind: PrimitiveKind) -> &PrimitiveArray {
        &self.arrays[kind.index()]
    }

    /// Assigns a column to every field, in order, and extends the arrays.
    ///
    /// `live` is the number of occupied slots whose cells must be preserved.
    pub fn allocate(&mut self, fields: &[FieldDesc], live: usize) -> Vec<FieldColumn> {
        let mut counts = self.columns_per_kind;
        let columns = fields
            .iter()
            .map(|field| {
                let slot = &mut counts[field.kind.index()];
                let column = FieldColumn { name: field.name, kind: field.kind, ordinal: *slot };
                *slot += 1;
                column
            })
            .collect();
        self.relayout(counts, self.capacity, live);
        columns
    }

    /// Grows every column to `capacity` slots, moving the first `live` cells
    /// of each column to its new offset.
    pub fn grow(&mut self, capacity: usize, live: usize) {
        if capacity > self.capacity {
            self.relayout(self.columns_per_kind, capacity, live);
        }
    }

    fn relayout(&mut self, counts: [usize; PrimitiveKind::COUNT], capacity: usize, live: usize) {
        let old_capacity = self.capacity;
        for kind in PrimitiveKind::ALL {
            let old_columns = self.columns_per_kind[kind.index()];
            let new_columns = counts[kind.index()];
            if new_columns == old_columns && capacity == old_capacity {
                continue;
            }
            let fresh = PrimitiveArray::with_len(kind, new_columns * capacity);
            let stale = &self.arrays[kind.index()];
            for ordinal in 0..old_columns {
                for slot in 0..live {
                    stale.move_cell(ordinal * old_capacity + slot, &fresh, ordinal * capacity + slot);
                }
            }
            self.arrays[kind.index()] = fresh;
        }
        self.columns_per_kind = counts;
        self.capacity = capacity;
    }

    /// Cell index of `slot` within `column`.
    #[inline]
    pub fn cell(&self, column: &FieldColumn, slot: usize) -> usize {
        column.offset(self.capacity) + slot
    }

    /// Moves every field of `columns` from slot `from` to slot `to`.
    pub fn move_slot(&self, columns: &[FieldColumn], from: usize, to: usize) {
        for column in columns {
            let array = self.array(column.kind);
            array.move_cell(self.cell(column, from), array, self.cell(column, to));
        }
    }

    /// Releases any heap data held by `slot` in `columns`.
    pub fn clear_slot(&self, columns: &[FieldColumn], slot: usize) {
        for column in columns {
            self.array(column.kind).clear_cell(self.cell(column, slot));
        }
    }
}

/// Write cursor over the field columns of one component at one slot.
pub struct FieldSink<'a> {
    arrays: &'a PrimitiveArrays,
    columns: &'a [FieldColumn],
    slot: usize,
    next: usize,
    component: &'static str,
}

impl<'a> FieldSink<'a> {
    /// Binds a sink to `slot` of the given columns.
    pub fn new(
        arrays: &'a PrimitiveArrays,
        columns: &'a [FieldColumn],
        slot: usize,
        component: &'static str,
    ) -> Self {
        Self { arrays, columns, slot, next: 0, component }
    }

    /// Writes the next declared field.
    pub fn put<P: Primitive>(&mut self, value: P) -> Result<(), FieldError> {
        let column = self.columns.get(self.next).ok_or(FieldError::Exhausted {
            component: self.component,
            declared: self.columns.len(),
        })?;
        if column.kind != P::KIND {
            return Err(FieldError::KindMismatch {
                field: column.name,
                declared: column.kind,
                requested: P::KIND,
            });
        }
        let index = self.arrays.cell(column, self.slot);
        if !value.store(self.arrays.array(column.kind), index) {
            return Err(FieldError::CellOutOfRange { field: column.name, index });
        }
        self.next += 1;
        Ok(())
    }

    /// Checks that every declared field was written.
    pub fn finish(self) -> Result<(), FieldError> {
        if self.next == self.columns.len() {
            Ok(())
        } else {
            Err(FieldError::Incomplete {
                component: self.component,
                written: self.next,
                declared: self.columns.len(),
            })
        }
    }
}

/// Read cursor over the field columns of one component at one slot.
pub struct FieldSource<'a> {
    arrays: &'a PrimitiveArrays,
    columns: &'a [FieldColumn],
    slot: usize,
    next: usize,
    component: &'static str,
}

impl<'a> FieldSource<'a> {
    /// Binds a source to `slot` of the given columns.
    pub fn new(
        arrays: &'a PrimitiveArrays,
        columns: &'a [FieldColumn],
        slot: usize,
        component: &'static str,
    ) -> Self {
        Self { arrays, columns, slot, next: 0, component }
    }

    /// Reads the next declared field.
    pub fn take<P: Primitive>(&mut self) -> Result<P, FieldError> {
        let column = self.columns.get(self.next).ok_or(FieldError::Exhausted {
            component: self.component,
            declared: self.columns.len(),
        })?;
        if column.kind != P::KIND {
            return Err(FieldError::KindMismatch {
                field: column.name,
                declared: column.kind,
                requested: P::KIND,
            });
        }
        let index = self.arrays.cell(column, self.slot);
        let value = P::load(self.arrays.array(column.kind), index)
            .ok_or(FieldError::CellOutOfRange { field: column.name, index })?;
        self.next += 1;
        Ok(value)
    }
}

/// Compile-time accessor table for a component stored as primitive fields.
///
/// `decompose` must `put` and `recompose` must `take` exactly the fields of
/// [`Decompose::FIELDS`], in that order.
pub trait Decompose: Sized {
    /// Fields in declaration order.
    const FIELDS: &'static [FieldDesc];

    /// Writes every field into `sink`.
    fn decompose(&self, sink: &mut FieldSink<'_>) -> Result<(), FieldError>;

    /// Rebuilds a value from `source`.
    fn recompose(source: &mut FieldSource<'_>) -> Result<Self, FieldError>;
}

/// Implements [`Decompose`] for a struct with named primitive fields.
///
/// ```
/// use columnar_ecs::decomposable;
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Position { x: f32, y: f32 }
/// decomposable!(Position { x: f32, y: f32 });
/// ```
#[macro_export]
macro_rules! decomposable {
    ($ty:ident { $($field:ident : $fty:ty),+ $(,)? }) => {
        impl $crate::engine::primitive::Decompose for $ty {
            const FIELDS: &'static [$crate::engine::primitive::FieldDesc] = &[
                $($crate::engine::primitive::FieldDesc {
                    name: stringify!($field),
                    kind: <$fty as $crate::engine::primitive::Primitive>::KIND,
                }),+
            ];

            fn decompose(
                &self,
                sink: &mut $crate::engine::primitive::FieldSink<'_>,
            ) -> ::core::result::Result<(), $crate::engine::error::FieldError> {
                $( sink.put::<$fty>(::core::clone::Clone::clone(&self.$field))?; )+
                Ok(())
            }

            fn recompose(
                source: &mut $crate::engine::primitive::FieldSource<'_>,
            ) -> ::core::result::Result<Self, $crate::engine::error::FieldError> {
                Ok(Self { $($field: source.take::<$fty>()?),+ })
            }
        }
    };
}

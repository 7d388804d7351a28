//! # Engine Module
//!
//! Internal ECS engine implementation.
//!
//! This module contains all core ECS building blocks such as:
//! - Signatures, access sets and identifiers
//! - Entity allocation
//! - Component registration and primitive decomposition
//! - Archetype column storage
//! - Query matching and caching
//! - Scheduling and systems
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod config;
pub mod entity;
pub mod primitive;
pub mod component;
pub mod storage;
pub mod archetype;
pub mod cache;
pub mod query;
pub mod commands;
pub mod world;
pub mod systems;
pub mod scheduler;

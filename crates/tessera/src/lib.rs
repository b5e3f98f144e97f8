//! # Tessera
//!
//! An authoritative, tick-based multiplayer server for a 2D tile-grid
//! world, together with the client-side components that consume its wire
//! protocol. This crate bundles the workspace: the shared kernel
//! ([`tessera_core`]), the world model ([`tessera_procedural`]), the sync
//! core ([`tessera_networking`]), plus the gameplay behavior pack and the
//! server binary.

pub mod behaviors;
pub mod settings;

pub use behaviors::GameplayHooks;
pub use settings::FileSettings;

pub use tessera_core as core;
pub use tessera_networking as networking;
pub use tessera_procedural as procedural;

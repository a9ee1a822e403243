//! # Forge Registry
//!
//! Resolution of registry modules: a [`ForgeClient`] lists releases, the
//! [`ForgeResolver`] picks one for a declared constraint, and the
//! [`ArtifactCache`] keeps verified release tarballs on disk.

pub mod artifact;
pub mod client;
pub mod integrity;
pub mod resolver;

pub use artifact::ArtifactCache;
pub use client::{client_for, ForgeClient, HttpForge, LocalForge, Release};
pub use integrity::ContentHash;
pub use resolver::{parse_requirement, select_release, ForgeResolver, ResolvedRelease};

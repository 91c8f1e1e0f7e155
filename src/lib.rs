//! Provider acquisition and authentication core.
//!
//! Locates, fetches, verifies, and installs executable provider packages
//! from a variety of sources -- a native origin registry protocol, an HTTP
//! mirror, an OCI Distribution registry, or the local filesystem -- behind
//! one [`source::Source`] contract, with a composable cryptographic
//! authentication pipeline ([`auth`]) that tracks *why* each content hash
//! is trusted.
//!
//! This crate has no binary target: dependency-lock-file persistence, CLI
//! argument parsing, and plugin process spawning are left to a downstream
//! consumer. Service discovery and credential storage are consumed through
//! the [`discovery::Discovery`] and [`credentials::CredentialStore`] traits
//! rather than implemented here.

pub mod auth;
pub mod cancel;
pub mod client;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod hash;
pub mod location;
pub mod meta;
pub mod oci;
pub mod provider;
pub mod source;
pub mod uritemplate;
pub mod util;

pub use error::Error;
pub use hash::Hash;
pub use meta::PackageMeta;
pub use provider::{Platform, Provider, VersionList};
pub use source::Source;
pub use util::context::GlobalContext;

//! Control-plane implementations for Rewind.
//!
//! This crate provides concrete implementations of the `ControlPlane` trait.
//!
//! # Supported Backends
//!
//! - **Neon**: the Neon v2 REST API (API key required)
//! - **Mock**: in-memory control plane for testing and local development

pub mod mock;
pub mod neon;

pub use mock::{ControlPlaneCall, MockCall, MockControlPlane};
pub use neon::{DEFAULT_BASE_URL, NeonControlPlane};

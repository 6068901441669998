//! Page adapter implementations
//!
//! The orchestrator core never holds a live page; everything site-specific
//! enters through the `PageAdapter` trait. This crate provides a scripted
//! in-memory adapter over a declarative site fixture, used by the
//! integration tests and the demo.

pub mod fixture;
pub mod scripted;

pub use fixture::{LandingBehavior, PageFixture, ResultFixture, SiteFixture};
pub use scripted::ScriptedAdapter;

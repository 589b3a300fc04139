//! fleetgrid-fake: in-memory plugins.
//!
//! `FakeInstances` and `FakeFlavor` implement the plugin traits against
//! plain maps. They record every call so tests can assert on exactly what
//! the controller did, and expose knobs to inject failures and health.
//! `fleetd simulate` uses them to run the controller without any
//! infrastructure.

pub mod flavor;
pub mod instance;

pub use flavor::FakeFlavor;
pub use instance::FakeInstances;

//! Test support for grid reconciliation.
//!
//! In-memory stand-ins for the node gateway and the ledger, with failure
//! injection and a call log, so reconciler behaviour can be asserted without
//! any node or chain.

mod gateway;
mod ledger;

pub use gateway::{FakeGateway, GatewayCall};
pub use ledger::FakeLedger;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a test-friendly subscriber once per process.
///
/// Honours `RUST_LOG`; defaults to warnings only.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

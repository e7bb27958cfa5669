// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Test support for the PostgreSQL client: an in-process protocol server and
//! a tracing setup for test binaries.

pub mod server;
pub mod statement;
pub mod util;

use std::sync::Once;

pub use server::TestServer;
use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber writing through the test harness.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Safe to call from
/// every test.
pub fn init_tracing() {
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
		let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
	});
}

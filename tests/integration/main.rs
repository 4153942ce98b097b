//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one part of the
//! binding against the mock probe service. Tests that do not need a
//! blocking client drive the server with `Server::poll` on the test
//! thread, so ordering is deterministic.

mod async_call_tests;
mod mock_service;
mod remote_tests;
mod subscription_tests;
mod sync_call_tests;

//! Queue integration tests

mod synced_tests;

//! Storage layer integration tests

mod backend_tests;
mod files_tests;
mod wal_tests;

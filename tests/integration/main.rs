// tests/integration/main.rs
#[path = "../common/mod.rs"]
mod common;

mod engine_tests;
mod enrollment_tests;
mod matching_tests;
#[path = "storage/template_store_tests.rs"]
mod template_store_tests;

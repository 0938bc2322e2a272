// src/storage/mod.rs
mod errors;
mod records;
mod template_store;

pub use errors::StorageError;
pub use template_store::TemplateStore;

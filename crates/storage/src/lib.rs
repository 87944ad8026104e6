#![forbid(unsafe_code)]

pub mod auth;
pub mod repository;
pub mod rows;
pub mod sqlite;

pub use repository::{Storage, StorageError};

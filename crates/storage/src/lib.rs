#![forbid(unsafe_code)]

pub mod repository;

pub use repository::{
    HistoryRepository, InMemoryRepository, PlanRepository, Storage, StorageError,
};

pub mod chunk_receiver;
pub mod cleanup;
pub mod error;
pub mod memory_storage;
pub mod merge;
pub mod presence;
pub mod staging;
pub mod storage;
pub mod upload_service;
pub mod worker;

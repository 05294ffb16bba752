pub mod access;
pub mod processor;
pub mod storage;
pub mod upload;

pub mod cli;
pub mod engine;
pub mod storage;
pub mod tools;

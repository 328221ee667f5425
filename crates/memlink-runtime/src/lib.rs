#![doc = include_str!("../README.md")]

pub mod worker;

pub use worker::{AsyncMapper, MapWorker, WorkerConfig};

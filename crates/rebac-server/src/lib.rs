pub mod adapter;
pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod service;
pub mod worker;

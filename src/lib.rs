// ABOUTME: Library module for seren-snapshot
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod archive;
pub mod checkpoint;
pub mod codec;
pub mod commands;
pub mod config;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod filters;
pub mod manifest;
pub mod mysql;
pub mod pipeline;
pub mod postgres;
pub mod resolver;
pub mod row;
pub mod storage;
pub mod table_name;
pub mod utils;

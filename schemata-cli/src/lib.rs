//! schemata CLI - command-line interface for schema-per-tenant deployments.
//!
//! This crate provides the `schemata` binary: listing tenants, applying
//! migrations or raw SQL across a selection of schemas, and creating,
//! cloning and dropping tenant namespaces.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;

//! Core library for VSS static-site hosting.
//!
//! Contains the plan catalog, the read-time plan/status resolver, the
//! reconciler that keeps stored deployment statuses in line with it, the plan
//! request workflow with its subscription ledger, and the deployment mutation
//! service. This crate depends on `vss-storage` for the storage backend trait
//! and knows nothing about how the engine is exposed.
//!
//! Start from [`platform::Platform`], which wires every service to one store,
//! clock and lock table.

pub mod activity;
pub mod admin;
pub mod asset;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod deploy;
pub mod deployment;
pub mod error;
pub mod locks;
pub mod platform;
pub mod reconcile;
pub mod request;
pub mod resolver;
pub mod seed;
pub mod store;
pub mod user;

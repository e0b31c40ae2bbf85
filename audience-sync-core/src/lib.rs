#![doc = "audience-sync-core: pipeline logic for synchronising warehouse tables into ads-platform custom audiences."]

//! This crate holds the data model, the collaborator contracts and the four
//! pipeline stages. It contains no transport code: the warehouse and the ads
//! platform are reached only through the traits in [`contract`].
//!
//! # Usage
//! Implement [`contract::Warehouse`] and [`contract::AdsPlatform`], build a
//! [`synchronise::SynchroniseConfig`] and call [`synchronise::synchronise`].

pub mod contract;
pub mod error;
pub mod provision;
pub mod resolve;
pub mod select;
pub mod synchronise;
pub mod users;

pub use error::SyncError;

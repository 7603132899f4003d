#![doc = "instance-sync-core: synchronisation engine for instance-sync."]

//! This crate holds the engine that copies teams, workspaces, projects,
//! datasets and media from one data-management instance to another. It never
//! talks HTTP itself: callers hand it two [`contract::InstanceApi`] handles.
//!
//! # Usage
//! Build a [`context::SyncContext`], then call [`synchronise::synchronise`]
//! and [`members::sync_members`], or [`run_record::run`] for both.

pub mod annotation;
pub mod config;
pub mod context;
pub mod contract;
pub mod error;
pub mod members;
pub mod model;
pub mod progress;
pub mod run_record;
pub mod strategy;
pub mod synchronise;
pub mod transcode;
pub mod transfer;

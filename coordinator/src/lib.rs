//! Off-chain coordinator for a request-response oracle protocol (RRP).
//!
//! A requester contract emits a request event on an EVM chain; this crate
//! discovers it, checks that the requester is authorized to use the endpoint,
//! performs the API call on the requester's behalf, signs the result with the
//! oracle key and submits a fulfillment (or failure) transaction back to the
//! chain.
//!
//! The entry point is [`coordinator::Coordinator`], which drives one full
//! generation of requests to completion. Remote boundaries (chain RPC, HTTP
//! APIs, worker execution, processing scripts) are injected behind traits so
//! deployments and tests can substitute their own implementations.

pub mod aggregation;
pub mod api;
pub mod authorization;
pub mod cache;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod evm;
pub mod gas_price;
pub mod model;
pub mod retry;
pub mod scanner;
pub mod submitter;

//! x402 payment facilitator for a VeChain-style account chain.
//!
//! This crate verifies that a client has authorized (or already settled) a
//! payment matching merchant-stated requirements, and optionally submits and
//! sponsors the on-chain settlement over the x402 HTTP payment protocol.
//!
//! # Architecture
//!
//! - [`network`] - CAIP-2 identifier parsing/normalization and the supported
//!   network allow-list.
//! - [`types`] - wire protocol types: payment requirements, signed-intent and
//!   legacy payloads, verify/settle responses.
//! - [`signature`] - canonical intent digests and signer recovery.
//! - [`nonce`] - the replay-protection ledger (SQLite-backed, with an
//!   in-memory variant).
//! - [`transfer`] - the fixed-schema decoder for the two recognized
//!   token-transfer call shapes, plus the known-token table.
//! - [`tx`] - the raw transaction codec and VIP-191 gas-payer co-signing.
//! - [`chain`] - the narrow [`ChainGateway`](chain::ChainGateway) contract
//!   the core requires from the node, with an HTTP implementation.
//! - [`delegation`] - the fee delegation engine: gas estimation, spend
//!   limits, rolling-window rate limiting, and the append-only event log.
//! - [`facilitator`] / [`facilitator_local`] - the settlement orchestrator
//!   behind the `/verify` and `/settle` endpoints.
//! - [`handlers`] - the axum HTTP surface.
//!
//! The chain node is an external collaborator consumed exclusively through
//! the gateway trait; nothing here reimplements consensus or node behavior.

pub mod chain;
pub mod config;
pub mod delegation;
pub mod facilitator;
pub mod facilitator_local;
pub mod handlers;
pub mod matcher;
pub mod network;
pub mod nonce;
pub mod shutdown;
pub mod signature;
pub mod telemetry;
pub mod timestamp;
pub mod transfer;
pub mod tx;
pub mod types;

//! # ragserve
//!
//! A guardrailed retrieval-augmented document Q&A service.
//!
//! ragserve ingests PDF documents into a persistent vector index and answers
//! questions against them with a multimodal language model. Queries pass
//! through input and output guardrail scanners, answers carry a grounding
//! confidence score and page-level source citations, and repeated questions
//! are served from an on-disk TTL cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────────┐
//! │  PDFs    │──▶│   Pipeline     │──▶│ VectorIndex │
//! │ data dir │   │ Parse+Embed   │   │ index.json  │
//! └──────────┘   └───────────────┘   └──────┬──────┘
//!                                           │
//!        query ──▶ input scan ──▶ retrieve ─┤
//!                                           ▼
//!                  refusal ◀── output scan ◀── synthesis (LLM + page images)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragserve ingest                        # index PDFs from the data directory
//! ragserve query "What is the policy?"   # one-off question
//! ragserve serve                         # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`node`] | Page-aligned nodes and node building |
//! | [`parse`] | Document parsing (local and remote) |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Persistent vector index |
//! | [`scan`] | Guardrail scanners |
//! | [`engine`] | Guardrail-wrapped query engine |
//! | [`llm`] | Multimodal synthesis client |
//! | [`cache`] | On-disk response cache |
//! | [`registry`] | Ingested-files registry |
//! | [`pipeline`] | Orchestrator tying it all together |
//! | [`server`] | HTTP server |
//! | [`error`] | Pipeline error type |

pub mod cache;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod llm;
pub mod node;
pub mod parse;
pub mod pipeline;
pub mod registry;
pub mod scan;
pub mod server;

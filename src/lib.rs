//! # Agrogate
//!
//! A farming-advisory HTTP gateway backed by the Gemini API.
//!
//! Agrogate forwards farmer questions, field photos, and knowledge documents
//! to Google's Generative Language API (file-search RAG, vision, and image
//! generation) and exposes the results as a small JSON API. The crate carries
//! no retrieval engine of its own: grounding is delegated to a vendor-managed
//! file-search store, and the local logic is limited to store/upload
//! negotiation, permissive JSON extraction from model text, and graceful
//! degradation when any vendor stage fails.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────────┐
//! │  Client  │──▶│ HTTP (axum) │──▶│  Gemini (reqwest) │
//! │ web/hook │   │ /ask /scan… │   │ text·vision·image │
//! └──────────┘   └──────┬──────┘   └────────┬─────────┘
//!                       │                   │
//!                       ▼                   ▼
//!                 ┌──────────┐       ┌─────────────┐
//!                 │ uploads/ │       │ file-search │
//!                 │ ledger   │       │    store    │
//!                 └──────────┘       └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! agro serve                        # start the HTTP gateway
//! agro scrape                       # collect public knowledge documents
//! agro ingest docs/red-rot.pdf      # index a document into the store
//! agro ask "How do I treat red rot?" --language hindi
//! agro store                        # show store name and ledger counts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | API request/response types |
//! | [`gemini`] | Gemini API client and the [`gemini::ModelClient`] trait |
//! | [`store`] | File-search store negotiation and upload dedup ledger |
//! | [`extract`] | Permissive JSON extraction from model text |
//! | [`infographic`] | Trigger phrases and the image-generation fallback |
//! | [`advisor`] | Ask / scan-image / classify-plant pipelines |
//! | [`webhook`] | Tolerant webhook payload parsing and verification |
//! | [`server`] | Axum HTTP server |
//! | [`scrape`] | Knowledge-base acquisition from public agricultural sources |

pub mod advisor;
pub mod config;
pub mod extract;
pub mod gemini;
pub mod infographic;
pub mod models;
pub mod scrape;
pub mod server;
pub mod store;
pub mod webhook;

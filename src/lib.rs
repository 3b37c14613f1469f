//! # Mail Insight
//!
//! An HTTP service that turns an email and its attachments into structured
//! JSON with a chat-completion model, plus a read-only collection-join query
//! over a hierarchical document store.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐
//! │  multipart │──▶│ attachment │──▶│   prompt   │──▶│ completion │
//! │   upload   │   │  classify  │   │  messages  │   │  (OpenAI)  │
//! └────────────┘   └────────────┘   └────────────┘   └────────────┘
//!
//! ┌────────────┐   ┌────────────┐
//! │   query    │──▶│   store    │  memory fixture / Firestore REST
//! └────────────┘   └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`classify`] | Extension allow-list and filename sanitizing |
//! | [`attachment`] | Upload → [`models::Attachment`] loading |
//! | [`extract`] | Optional PDF / DOCX text extraction |
//! | [`prompt`] | Chat message construction |
//! | [`completion`] | Completion client abstraction and reply parsing |
//! | [`process`] | Per-request analysis pipeline |
//! | [`store`] | Document store abstraction (memory, Firestore) |
//! | [`query`] | Collection-join query |
//! | [`server`] | HTTP server |
//! | [`logging`] | Tracing subscriber setup |

pub mod attachment;
pub mod classify;
pub mod completion;
pub mod config;
pub mod extract;
pub mod logging;
pub mod models;
pub mod process;
pub mod prompt;
pub mod query;
pub mod server;
pub mod store;

//! debrief — index project documents and generate briefings from them.
//!
//! The pipeline ingests uploaded documents (plain text, markdown, CSV, PDF,
//! DOCX), splits them into overlapping chunks, embeds each chunk, and
//! upserts the vectors into a remote index tagged with the owning project.
//! Briefing reports are asynchronous jobs: a request creates a durable
//! ledger row, generation retrieves project-scoped context and writes a
//! rendered document, and a background judge scores the result.
//!
//! The seams are traits: [`embedding::Embedder`], [`generation::Generator`]
//! and [`index::VectorIndex`] each have a production implementation backed
//! by an HTTP API and in-memory stand-ins for tests.

pub mod briefing;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod eval;
pub mod extract;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod ledger;
pub mod migrate;
pub mod models;
pub mod render;
pub mod server;

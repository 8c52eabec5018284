//! Rollback use-cases.
//!
//! # Responsibility
//! - Classify attachments (`reconcile`), build the document to save
//!   (`assemble`) and orchestrate collaborators (`rollback_service`).
//! - Keep rollback logic storage-agnostic: only collaborator traits are used.

pub mod assemble;
pub mod reconcile;
pub mod rollback_service;

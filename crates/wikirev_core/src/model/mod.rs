//! Domain model for document revisions and attachments.
//!
//! # Responsibility
//! - Define the snapshot shapes exchanged between stores and rollback.
//! - Keep revision labels and identities strongly typed.
//!
//! # Invariants
//! - Attachments and documents carry independent revision labels.
//! - Attachments are keyed by filename, never by version label.

pub mod attachment;
pub mod document;
pub mod version;

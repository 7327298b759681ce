//! Joins extracted K-1 documents to investor rows.

pub mod engine;
pub mod normalize;

pub use engine::reconcile;

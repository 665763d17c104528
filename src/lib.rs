//! Batched LLM evaluation of applicant records against scoring criteria.
//!
//! The crate is a library invoked by a host UI layer: records, settings
//! storage, and the destination store are all injected through traits, and
//! the screening workflow orchestrates planning, batched evaluation, retry,
//! and failure bookkeeping on top of them.

pub mod config;
pub mod workflows;

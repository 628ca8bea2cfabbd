//! Job Agent: screens job postings against a candidate profile and
//! notifies about the ones worth applying to.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod profile;
pub mod store;

//! Token secrets, cache subjects, and the results produced by every acquisition.

pub mod result;
pub mod secret;
pub mod subject;

//! Identifiers, scope sets, identity material, and acquisition results.

pub mod id;
pub mod identity;
pub mod scope;
pub mod token;

pub use id::*;
pub use identity::*;
pub use scope::*;
pub use token::{result::*, secret::*, subject::*};

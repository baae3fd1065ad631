//! Utility functions and types.

mod capability;
mod constants;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use capability::*;
pub use constants::*;

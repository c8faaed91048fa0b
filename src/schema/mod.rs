//! Schema module - recovering and validating datapoints from model output.

mod extract;
mod validate;

pub use extract::*;
pub use validate::*;

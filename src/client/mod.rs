//! Model provider clients.

mod anthropic;
mod gemini;
mod http;
mod openai;
mod provider;
mod rate_limiter;
mod registry;

pub use anthropic::*;
pub use gemini::*;
pub use http::*;
pub use openai::*;
pub use provider::*;
pub use rate_limiter::*;
pub use registry::*;

//! Dataset synthesis and transformation pipelines.

mod flatten;
mod pacer;
mod report;
mod synthesis;
mod transform;
mod window;

pub use flatten::*;
pub use pacer::*;
pub use report::*;
pub use synthesis::*;
pub use transform::*;
pub use window::*;

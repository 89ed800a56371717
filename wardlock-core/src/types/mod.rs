mod audit;
mod collision;
mod lease;
mod primitives;
mod queue;

pub use audit::*;
pub use collision::*;
pub use lease::*;
pub use primitives::*;
pub use queue::*;

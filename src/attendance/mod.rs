pub mod marking;
pub mod roster;
pub mod stats;

pub use marking::*;
pub use roster::*;
pub use stats::*;

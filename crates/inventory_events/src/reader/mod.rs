mod sync;

pub use sync::{BoundedLine, BoundedLineReader};

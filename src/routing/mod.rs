pub mod path_pattern;
pub mod router;

pub use path_pattern::{PathClassification, PathMatcher, PathPattern};
pub use router::{Route, RouteTable};

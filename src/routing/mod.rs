pub mod cache;
pub mod matrix;
pub mod render;
pub mod runtime;

pub use cache::{Resolved, RoutedFileCache};
pub use matrix::{RoutingConfig, RoutingMatrix, RoutingMode};
pub use render::{route, RouteOutcome};
pub use runtime::{build_runtime_matrix, RuntimeMatrix};

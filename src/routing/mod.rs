//! Path handling for published routes.

pub mod template;

pub use template::{align, normalize, reconcile, PathAlignment, PathTemplate, Segment};

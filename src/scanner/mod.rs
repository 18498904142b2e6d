pub mod archive;
pub mod dispatcher;
pub mod engine;
pub mod path_filter;
pub mod tree_walker;

pub use dispatcher::{FileReport, ScanDispatcher};
pub use engine::Scanner;
pub use path_filter::{GitignoreStack, PathFilter};
pub use tree_walker::{ScanTask, TreeWalker, WalkEvent};

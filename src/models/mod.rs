pub mod scan_result;

pub use scan_result::{Scan, ScanStats};

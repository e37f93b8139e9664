pub mod file_format;
pub mod parallel;
pub mod shared_fn;
pub mod test_utils;

pub use shared_fn::SharedFn;

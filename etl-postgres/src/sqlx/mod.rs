pub mod columns;
pub mod file_state;
#[cfg(feature = "test-utils")]
pub mod test_utils;

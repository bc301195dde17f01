//! Test helpers shared by the simpledb crates.
//!
//! - [`TestDir`]: a throwaway database root with raw file access
//! - [`strategies`]: proptest generators for rows and page layouts

#![deny(unsafe_code)]

mod test_dir;
pub use test_dir::TestDir;

pub mod strategies;

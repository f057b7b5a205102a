//! Common test infrastructure
//!
//! Each test gets a [`TestLibrarian`]: a real librarian started from config
//! against its own temporary database directory.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestLibrarian;
//!
//! #[test]
//! fn test_startup() {
//!     let lib = TestLibrarian::builder().spawn();
//!     lib.wait_until("index populated", || lib.indexed_record_ids().len() == 3);
//! }
//! ```

mod constants;
mod fixtures;
mod librarian;

pub use constants::*;
pub use librarian::{TestLibrarian, TestLibrarianBuilder};

#[allow(unused_imports)]
pub(crate) use fixtures::{create_test_library, seed_search_index};

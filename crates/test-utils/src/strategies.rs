//! Proptest strategies for table data.
//!
//! Reusable generators for property-based testing across crates. They know
//! nothing about the store's types, only the shapes of data it persists.
//!
//! # Usage
//!
//! ```no_run
//! use simpledb_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(rows in strategies::arb_country_rows(0..50)) {
//!         // store and reload rows
//!     }
//! }
//! ```

use std::ops::Range;

use proptest::prelude::*;

/// Generates a payload of 0-4095 random bytes.
pub fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..4096)
}

/// Generates a page size between the accepted minimum (64) and 4096.
pub fn arb_page_size() -> impl Strategy<Value = usize> {
    64usize..=4096
}

/// Generates a two-letter upper-case country code.
pub fn arb_country_code() -> impl Strategy<Value = String> {
    "[A-Z]{2}"
}

/// Generates a display name of 1-40 characters, including non-ASCII letters.
pub fn arb_name() -> impl Strategy<Value = String> {
    "[A-Za-zÀ-ÿ][A-Za-zÀ-ÿ .'-]{0,39}"
}

/// Generates `(code, name)` pairs with distinct codes.
pub fn arb_country_rows(len: Range<usize>) -> impl Strategy<Value = Vec<(String, String)>> {
    proptest::collection::btree_map(arb_country_code(), arb_name(), len)
        .prop_map(|rows| rows.into_iter().collect())
}

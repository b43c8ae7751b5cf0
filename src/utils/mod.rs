//! Shared utility functions for webjudge.

pub mod json_extraction;

pub use json_extraction::{extract_json, extract_json_value, find_matching_delimiter};

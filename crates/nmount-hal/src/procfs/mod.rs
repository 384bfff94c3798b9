//! Parsers for `/proc` text interfaces.

pub mod mountinfo;

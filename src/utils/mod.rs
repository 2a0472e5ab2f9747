//! Utility modules for the ccgo-deps binary

pub mod terminal;

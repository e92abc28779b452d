pub mod demo;
pub mod keys;

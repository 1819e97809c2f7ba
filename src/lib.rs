// src/lib.rs
// Main library module declarations

pub mod analysis;
pub mod config;
pub mod domain;
pub mod exchange;
pub mod ledger;
pub mod status;
pub mod trading;

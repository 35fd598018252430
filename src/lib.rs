// src/lib.rs
pub mod drivers;
pub mod engine;
pub mod settings;
pub mod types;

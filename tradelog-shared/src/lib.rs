#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod models;

#![cfg_attr(test, allow(warnings))]

//! Translation profiles stored in `~/.config/mediatranslation.toml`.

pub mod config_store;
pub mod config_store_error;
pub mod profile_config;

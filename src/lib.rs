#![warn(rust_2018_idioms)]

#[macro_use]
extern crate slog_scope;

pub mod db;
pub mod error;
pub mod logging;
pub mod server;
pub mod settings;
pub mod web;

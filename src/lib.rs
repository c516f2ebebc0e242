#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod artifacts;
pub mod browser_controller;
pub mod config;
pub mod driver;
pub mod extractor;
pub mod orchestrator;
pub mod runner;
pub mod settle;
pub mod store;
pub mod types;
pub mod utils;

pub mod cache;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod das;
pub mod dataset;
pub mod domain;
pub mod download;
pub mod erddap;
pub mod error;
pub mod nrt;
pub mod output;
pub mod pipeline;
pub mod planner;
pub mod store;
pub mod urls;

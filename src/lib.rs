#[macro_use]
pub mod macros;

pub mod catalog;
pub mod chart;
pub mod config;
pub mod dataset;
pub mod page_cache;
pub mod pipeline;
pub mod publish;
pub mod table;

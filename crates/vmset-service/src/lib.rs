#[macro_use]
pub mod metrics;

pub mod caching;
pub mod compute;
pub mod config;
pub mod logging;
pub mod provider_id;
pub mod store;
pub mod utils;
pub mod virtualmachine;
pub mod vmset;

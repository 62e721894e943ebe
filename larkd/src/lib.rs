
pub extern crate lark_lib;

#[macro_use] extern crate anyhow;
#[macro_use] extern crate serde;

#[cfg(test)]
#[macro_use] extern crate lazy_static;

pub mod chain;
pub mod config;
pub mod error;
pub mod manager;
pub mod repository;
pub mod wallet;
pub mod watcher;

mod serde_util;

#[cfg(test)]
mod testutil;

pub use crate::config::Config;
pub use crate::manager::{PoolManager, TransferOutcome};
pub use crate::watcher::PoolWatcher;

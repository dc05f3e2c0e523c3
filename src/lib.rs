pub mod config;
pub mod confirm;
pub mod error;
pub mod ledger;
pub mod mail;
pub mod pipeline;
pub mod report;
pub mod sheet;
pub mod stats;

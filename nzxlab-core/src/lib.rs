//! nzxlab core: market data, the price panel, the labeled dataset and the models.
//!
//! - Data providers for Yahoo prices and fundamentals, behind traits
//! - Hive-partitioned Parquet price cache
//! - Long-format price panel with lagging and leading returns
//! - As-of join of statement dates onto trading dates and BeatIndex labeling
//! - CART trees and a random forest classifier

pub mod data;
pub mod dataset;
pub mod fingerprint;
pub mod model;
pub mod panel;
pub mod rng;

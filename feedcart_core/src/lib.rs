#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Weight acquisition core (source-agnostic).
//!
//! All sources are reached through `feedcart_traits::WeightSource`; this crate
//! decides which one is active and keeps the shared weight state.
//!
//! ## Architecture
//!
//! - **Manager**: `WeightManager` with read caching, failover to simulation
//!   and observer fan-out (`manager` module)
//! - **State**: `WeightState` and the serialisable `StatusSnapshot` (`state`)
//! - **Errors**: `WeightError` plus mapping from driver errors (`hw_error`)
//! - **Construction**: `WeightManager::builder()` and config bridges
//!   (`builder`, `conversions`)

pub mod builder;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod manager;
pub mod mocks;
pub mod state;
pub mod util;

pub use builder::WeightManagerBuilder;
pub use error::{BuildError, WeightError};
pub use manager::{DynSource, ManagerCfg, WeightManager, WeightObserver};
pub use state::{Mode, StatusSnapshot, WeightState, Writer};

// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dynproxy-proxy: the pool controller — a reverse proxy over a dynamically
//! scaled pool of stateless HTTP backend workers.

pub mod adapter;
pub mod autoscaler;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod env;
pub mod error;
pub mod prober;
pub mod proxy_http;
pub mod registry;

pub use config::Config;
pub use controller::Controller;

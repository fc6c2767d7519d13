//! rvm-runtime: the `rvmd` daemon and its operator client.
//!
//! The daemon hosts the message bus, polls the field controller, and runs
//! the state machine on its own thread.

pub mod cli;
pub mod client;
pub mod daemon;
pub mod poll_loop;
pub mod sim_feed;
pub mod tick_loop;

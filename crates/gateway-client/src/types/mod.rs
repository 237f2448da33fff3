//! Wire types for the gateway API.

mod send;
mod webhook;

pub use send::*;
pub use webhook::*;

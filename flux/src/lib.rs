#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub const PROTOCOL_ID: u16 = 0x0a55;

pub mod logging;
pub mod shared;
pub mod time;

#[macro_use]
pub mod util;

pub use shared::{ErrorUtils, NetworkError, NetworkResult};

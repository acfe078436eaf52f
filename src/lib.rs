pub mod core;

mod cell;
mod derived;
mod effect;
mod store;
mod subscription;

pub use cell::*;
pub use derived::*;
pub use effect::*;
pub use store::*;
pub use subscription::*;

pub use crate::core::{spawn_action, SignalContext, WriteError};

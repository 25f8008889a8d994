pub mod config;
pub mod delegate;
pub mod group;
pub mod pause;
pub mod unit;

pub use config::{ChannelConfig, Priority};
pub use delegate::{ChannelDelegate, DelegateSet};
pub use group::{ChannelError, ChannelGroup, ChannelUnit};
pub use pause::{PauseSet, PauseToken};
pub use unit::UnitSnapshot;

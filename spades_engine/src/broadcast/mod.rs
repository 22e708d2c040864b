//! State broadcaster: renders per-seat views and pushes them to observers.

pub mod channel;
pub mod views;

pub use channel::{Broadcaster, ChannelBroadcaster};
pub use views::{PlayerView, SeatView, render};

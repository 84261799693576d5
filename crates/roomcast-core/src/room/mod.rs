//! Rooms

mod room;

pub use room::{Room, RoomPolicy};

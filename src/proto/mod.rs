pub mod frame;
pub mod wire;

pub use frame::{Frame, FrameKind};
pub use wire::{WireError, WireResult};

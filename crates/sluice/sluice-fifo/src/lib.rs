mod fifo;
mod ring;

pub use fifo::Fifo;
pub use ring::{RingConfig, Window, Windows};

//! Per-channel timestamped sample queue between an acquisition thread and a
//! disk-writing thread.
//!
//! The producer pushes blocks per channel with [`DataQueue::write_channel`];
//! the consumer brackets its access with [`DataQueue::start_read`] and the
//! returned [`ReadSession`], which borrows the reserved sample regions in place
//! and hands back one reconciled timestamp per channel.

mod error;
mod queue;
mod session;
mod store;
mod timestamps;

pub use error::QueueError;
pub use queue::{DataQueue, QueueConfig, WriteOutcome};
pub use session::{ChannelRead, ReadSession, SampleView};
pub use sluice_fifo::{Window, Windows};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("a read session is already open")]
    ReadInProgress,

    #[error("channel {channel} out of range (queue has {num_channels})")]
    ChannelOutOfRange { channel: usize, num_channels: usize },

    #[error("block {block} out of range (ring holds {num_blocks})")]
    BlockOutOfRange { block: usize, num_blocks: usize },

    #[error("channel {channel} already has an active writer")]
    ConcurrentWrite { channel: usize },

    #[error("invalid queue configuration: {0}")]
    InvalidConfig(&'static str),
}

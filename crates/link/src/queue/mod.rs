//! Outbound packet queueing.

pub mod tx_queue;

pub use tx_queue::{
    send_fn, DelayFn, PacketSender, SendFn, TxQueue, TxQueueConfig, TxQueueStats,
};

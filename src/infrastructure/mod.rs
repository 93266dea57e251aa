pub mod atomic_file;
pub mod health;
pub mod journal;
pub mod logging;
pub mod operation_lock;
pub mod solana_rpc;

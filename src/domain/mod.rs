//! 领域模型：地址、汇率、转账记录

pub mod address;
pub mod rate;
pub mod transfer;

pub use address::{AccountAddress, AddressError};
pub use rate::{RateError, LAMPORTS_PER_SOL, MIN_WITHDRAWAL_COINS, RATE, WITHDRAWAL_STEP_COINS};
pub use transfer::{SignatureState, TransferRecord, TransferStatus};

pub mod chain_transfer;
pub mod coin_ledger;
pub mod custodial_funding;
pub mod exchange;
pub mod reconciliation;
pub mod retry;
pub mod solana_tx;
pub mod wallet_session;

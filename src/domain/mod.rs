pub mod account;
pub mod trade;

pub use account::{Account, AccountEvent, Beneficiary, Instructions, Suitability};
pub use trade::{Activity, Customer, Symbol, TradeRequest, TradeState, TransactionType};

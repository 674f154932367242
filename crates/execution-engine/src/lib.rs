pub mod engine;
pub mod relay;
pub mod types;

pub use engine::ExecutionEngine;
pub use relay::RelayTradingClient;
pub use types::{TradeError, TradeReceipt, TradingProvider, DRY_RUN_TX};

//! Walk-forward backtest driver (§4.6): re-applies the factor engine and
//! Black-Litterman optimizer at each scheduled rebalance date and simulates
//! the portfolio's realized equity curve between rebalances.

pub mod engine;
pub mod models;
pub mod schedule;

pub use engine::BacktestEngine;
pub use models::{
    annualized_return, annualized_volatility, max_drawdown, sharpe_ratio, turnover,
    BacktestConfig, BacktestResult, EquityPoint, RebalanceFrequency, RebalanceRecord,
};
pub use schedule::rebalance_dates;

pub mod alphavantage;
pub mod transport;

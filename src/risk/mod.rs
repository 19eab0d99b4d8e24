pub mod alerts;
pub mod kill_switch;
pub mod manager;
pub mod sizing;
pub mod stress;
pub mod volatility;

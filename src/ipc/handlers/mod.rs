pub mod activity;
pub mod backup_exchange;
pub mod behavior;
pub mod check_in;
pub mod core;
pub mod roster;

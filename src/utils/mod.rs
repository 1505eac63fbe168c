pub mod command;
pub mod polling;

pub mod control;
pub mod led;

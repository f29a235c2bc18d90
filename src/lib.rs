pub mod app;
pub mod monitor;
pub mod publish;

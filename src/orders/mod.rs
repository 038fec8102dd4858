pub mod handlers;
pub mod service;
pub mod validator;

pub use service::OrderIntake;

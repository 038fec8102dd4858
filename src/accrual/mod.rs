pub mod client;
pub mod reconciler;

pub use client::{AccrualSource, HttpAccrualClient};
pub use reconciler::{AccrualReconciler, ReconcilerConfig, ReconcilerHandle};

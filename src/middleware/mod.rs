pub mod identity;
pub mod validation;

pub use identity::Owner;
pub use validation::ValidatedJson;

pub mod constructor;
pub mod inputs;
pub mod library;

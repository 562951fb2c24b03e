// Core domain types and error taxonomy, shared by every other module.

pub mod errors;
pub mod models;

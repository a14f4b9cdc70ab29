//! Stateless repositories — every method takes `&Connection`.

pub mod descriptor;
pub mod workspace;

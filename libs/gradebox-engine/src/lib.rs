pub mod compare;
pub mod deadline;
pub mod error;
pub mod grade;
pub mod inject;
pub mod runtime;
pub mod service;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub mod batch;
pub mod customer;
pub mod engine;
pub mod job;
pub mod transaction;

pub mod deliveries;
pub mod dispatcher;
pub mod endpoints;
pub mod engine;
pub mod publisher;
pub mod queue;
pub mod scheduler;
pub mod signing;

//! End-to-end scenarios against the execution engine

mod helpers;

mod cancellation;
mod failure_handling;
mod fan_in;
mod retrieval;
mod routing;
mod streaming;

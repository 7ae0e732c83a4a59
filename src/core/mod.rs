pub mod components;
pub mod error;
pub mod event;
pub mod event_queue;
pub mod execution;
pub mod observer;
pub mod results;
pub mod time;
pub mod types;

#[cfg(test)]
mod tests;

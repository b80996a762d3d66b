pub mod activity;
pub mod heartbeat;
pub mod initiative;
pub mod mode;
pub mod relationship;
pub mod scheduler;
pub mod sentiment;
pub mod templates;
pub mod timers;

#[cfg(test)]
mod tests;

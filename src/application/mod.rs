// Application layer - Use cases and ports
pub mod metering_portal;
pub mod metering_service;
pub mod migration_service;
pub mod pod_resolver;
pub mod poll_service;
pub mod scheduler;
pub mod throttle;

#[cfg(test)]
pub(crate) mod fake_portal;

// Poller for the SSD IMS metering portal
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

// Domain layer - Portal independent types and rules
pub mod account;
pub mod error;
pub mod metering;
pub mod period;
pub mod pod;

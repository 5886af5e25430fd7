// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod ims_repository;
pub mod portal_models;
pub mod session_client;

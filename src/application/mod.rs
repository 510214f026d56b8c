// Application layer - server composition, routing and collaborator contracts
pub mod backends;
pub mod catalog;
pub mod router;
pub mod server_config;
pub mod telemetry_repository;
pub mod telemetry_server;

#[cfg(test)]
pub mod testing;

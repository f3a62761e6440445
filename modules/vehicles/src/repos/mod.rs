pub mod failed_repo;
pub mod vehicle_repo;

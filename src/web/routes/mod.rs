pub mod push_routes;
pub mod scheduler_routes;

pub mod bridge;
pub mod cache;
pub mod http;
pub mod registry;
pub mod walk;

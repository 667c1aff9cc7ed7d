pub mod functions;
pub mod scheduler;
pub mod workspace;

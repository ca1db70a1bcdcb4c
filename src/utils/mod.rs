// Utility modules for common functionality
pub mod command;
pub mod logger;
pub mod process;

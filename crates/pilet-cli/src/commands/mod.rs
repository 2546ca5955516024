pub mod clean;
pub mod debug;
pub mod version;

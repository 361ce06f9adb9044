pub mod api;
pub mod buffer;
pub mod capture;
pub mod clip;
pub mod config;
pub mod delivery;
pub mod error;
pub mod extractor;
pub mod s3_uploader;
pub mod session;
pub mod timeline;
pub mod utilities;

pub use error::ReplayError;
pub use session::SessionController;

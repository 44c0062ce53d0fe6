//! Outbound integrations. Each client is optional and only built when its
//! config section is present.

pub mod cloudinary;
pub mod shiprocket;

pub use cloudinary::CloudinaryClient;
pub use shiprocket::ShiprocketClient;

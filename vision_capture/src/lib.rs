pub mod app;
pub mod capture;
pub mod client;
pub mod config;
pub mod frame;
pub mod pipeline;
pub mod provisioner;
pub mod telemetry;

#[cfg(feature = "camera")]
pub mod camera;

#[cfg(test)]
mod test_support;

pub use app::start_app;

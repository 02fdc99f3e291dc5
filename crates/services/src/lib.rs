#![forbid(unsafe_code)]

pub mod app_services;
pub mod config;
pub mod error;
pub mod progress_service;
pub mod stats_service;

pub use progress_core::Clock;

pub use app_services::AppServices;
pub use config::ProgressConfig;
pub use error::{AppServicesError, ProgressServiceError};
pub use progress_service::ProgressService;
pub use stats_service::CourseStatsService;

//! HTTP API handlers for ua-at

pub mod attendance;
pub mod health;
pub mod policy;
pub mod registration;
pub mod scan;
pub mod sse;
pub mod tags;

pub use attendance::attendance_routes;
pub use health::health_routes;
pub use policy::policy_routes;
pub use registration::registration_routes;
pub use scan::scan_routes;
pub use sse::event_stream;
pub use tags::tag_routes;

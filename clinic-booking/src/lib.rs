pub mod attendance;
pub mod booking;
pub mod handlers;

pub use attendance::AttendanceService;
pub use booking::{BookingOutcome, BookingService};
pub use handlers::ClinicJobHandler;

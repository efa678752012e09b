pub mod booking;
pub mod reservation;
pub mod writer;

pub use booking::AppointmentBookingService;
pub use reservation::ReservationCoordinator;
pub use writer::AppointmentWriter;

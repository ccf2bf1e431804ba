pub mod coordinate;
pub mod help_request;
pub mod notification;
pub mod user_location;

pub use coordinate::Coordinate;
pub use help_request::{HelpRequestRow, NewHelpRequest};
pub use notification::{DispatchOutcome, NotificationPayload};
pub use user_location::UserLocationRow;

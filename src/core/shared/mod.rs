pub mod error;
pub mod models;
pub mod schema;
pub mod state;
pub mod utils;

pub use error::{AjaxError, PqrsError};
pub use models::{
    AdminUser, City, ComplaintType, Insurer, InsurerEmail, NewAdminUser, NewTicket, TicketDetails,
    TicketStatus,
};
pub use utils::{create_conn, run_migrations, DbPool};


pub mod users;

pub use users::{PgUserStore, UserStore};

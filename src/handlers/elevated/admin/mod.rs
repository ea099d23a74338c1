// handlers/elevated/admin/mod.rs - Admin console handlers

pub mod session; // POST /api/admin/login, POST /api/admin/logout
pub mod users; // /api/admin/users[/:id]

pub use session::{login_post, logout_post};
pub use users::{user_delete, user_put, users_get, users_post};

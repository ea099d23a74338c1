// handlers/public/auth/mod.rs - Public authentication handlers

pub mod login; // POST /api/login - check credentials and get a user session
pub mod logout; // POST /api/logout - drop the user from the session
pub mod register; // POST /api/register - create account, workspace and session

pub use login::login_post;
pub use logout::logout_post;
pub use register::register_post;

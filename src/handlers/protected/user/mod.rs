// handlers/protected/user/mod.rs - Current user handlers

pub mod get_user; // GET /api/get_user

pub use get_user::get_user;

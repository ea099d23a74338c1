// handlers/public/mod.rs - Public handlers (no session required)
//
// Account creation and token acquisition. Every request here still passes
// through the session middleware, so handlers can extend an existing session
// (an admin who logs in as a user keeps the admin flag).

pub mod auth;

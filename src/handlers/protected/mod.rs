// handlers/protected/mod.rs - Protected handlers (logged-in user required)
//
// Routes in this tier sit behind `require_user`, so the `Claims` extension
// always names an account by the time a handler runs.

pub mod user;

// handlers/elevated/mod.rs - Elevated handlers (admin session required)
//
// Security flow:
// 1. Operator reads the admin key from the startup log (or the `Key/secret` document)
// 2. POST /api/admin/login with `{ "value": key }` → token with `admin = true`
// 3. /api/admin/* routes accept that token until logout or expiry
//
// Only `admin::session::login_post` is reachable without the flag.

pub mod admin;

pub mod admin;
pub mod pages;
pub mod ws;

/// Name of the session identity cookie.
pub const SESSION_COOKIE: &str = "sessionId";

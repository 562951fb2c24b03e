// Authentication module: bearer-token gate for the HTTP API.

pub mod auth_middleware;

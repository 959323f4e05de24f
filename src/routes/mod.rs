pub mod ai;
pub mod auth;
pub mod billing;
pub mod documents;
pub mod public;
pub mod stripe;
pub mod workspaces;

pub mod ai;
pub mod deploy;
pub mod dns;
pub mod entitlement;
pub mod object_store;
pub mod stripe;

pub mod auth;
pub mod comments;
pub mod error;
pub mod events;
pub mod health;
pub mod invites;
pub mod notifications;
pub mod participations;
pub mod passes;
pub mod users;

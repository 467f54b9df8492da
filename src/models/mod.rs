pub mod commands;
pub mod delivery;
pub mod fcm;
pub mod health;
pub mod message;
pub mod notification;
pub mod result;
pub mod retry;
pub mod status;
pub mod validation;

pub mod consumer;
pub mod fcm;
pub mod health;
pub mod hub;
pub mod inapp;
pub mod memory;
pub mod publisher;
pub mod rbmq;
pub mod registry;
pub mod transport;

mod common;

mod dispatcher_tests;
mod fcm_tests;
mod rabbitmq_tests;

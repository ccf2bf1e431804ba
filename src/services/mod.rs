pub mod fcm_gateway;
pub mod geo;
pub mod notification_service;
pub mod notify_worker;
pub mod proximity_service;
pub mod push_gateway;
pub mod request_service;
pub mod user_service;
pub mod user_store;

pub mod convert;
pub mod server;
pub mod store_service;

pub use server::StoreServer;
pub use store_service::StoreServiceImpl;

pub mod in_memory_gateway;
pub mod sqlite_gateway;

pub mod file_manager;
pub mod file_record;
pub mod node_record;
pub mod registry;
pub mod storage_manager;

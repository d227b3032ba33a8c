pub mod directory_sync;

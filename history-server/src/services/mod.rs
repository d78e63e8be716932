pub mod backup_scheduler;
pub mod file_watcher;

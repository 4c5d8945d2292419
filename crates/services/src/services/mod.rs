pub mod config;
pub mod project;
pub mod start_scripts;
pub mod upstream;
pub mod worktree_manager;

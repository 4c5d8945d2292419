pub mod path;
pub mod port_file;
pub mod response;
pub mod shell;
pub mod text;

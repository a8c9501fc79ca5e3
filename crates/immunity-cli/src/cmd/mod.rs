pub mod build;
pub mod history;
pub mod init;
pub mod poll;
pub mod region;
pub mod serve;

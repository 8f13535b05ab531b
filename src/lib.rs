pub mod api;
pub mod auther;
pub mod cli;
pub mod credential;
pub mod error;
pub mod lifecycle;
pub mod mesh;
pub mod policy;
pub mod settings;
pub mod storage;

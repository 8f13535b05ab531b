//! All Paths are recorded here for use throughout this codebase
pub mod base {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
}

pub const TRIM_CACHES: &str = "/trim-caches";

pub mod access {
    pub const LIST: &str = "/access";
    /// GET reads a credential by id; POST issues one into the group named by the segment
    pub const ONE: &str = "/access/:id";
    pub const STATE: &str = "/access/:id/state";
    pub const SUMMARY: &str = "/access/:id/summary";
}

pub mod services {
    pub const ALL: &str = "/services";
    pub const ONE: &str = "/services/:id";
}

pub mod policy {
    pub const ROW: &str = "/policy/:table/:id";
}

pub mod mesh {
    pub const NODES: &str = "/mesh/nodes";
    pub const SYNC: &str = "/mesh/sync";
    pub const SEARCH: &str = "/mesh/search/:collection";
}


pub mod clock;
pub mod coalesce;
pub mod config;
pub mod db;
pub mod error;
pub mod state;
pub mod tasks;

pub mod crypto {
    pub mod aes;
    pub mod context;
    pub mod digest;
    pub mod jwt;
}

pub mod models {
    pub mod callback;
    pub mod config;
    pub mod context;
    pub mod credential;
    pub mod document;
    pub mod session;
}

pub mod store {
    pub mod feed;
    pub mod kv;
    pub mod local;
    pub mod lock;
    pub mod session;
}

pub mod repositories {
    pub mod credential;
}

pub mod services {
    pub mod config;
    pub mod fallback;
    pub mod identity;
    pub mod removal;
    pub mod sessions;
    pub mod token_cache;
    pub mod zoom;
}

pub mod handlers {
    pub mod callback;
    pub mod config;
    pub mod sessions;
    pub mod users;
}

pub mod middleware_layer {
    pub mod context;
    pub mod internal;
}

pub mod validation {
    pub mod callback;
    pub mod credential;
    pub mod session;
}

pub mod routes;

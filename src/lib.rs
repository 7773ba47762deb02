pub mod config;
pub mod docs;
pub mod jobs;
pub mod lexicon;
pub mod ops;
pub mod preview;
pub mod profiles;
pub mod resolver;
pub mod service;
pub mod shared;

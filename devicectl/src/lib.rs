pub mod cli;
pub mod context;
pub mod daemonconfig;
pub mod datastore;
pub mod logging;
pub mod recovery;
pub mod registration;
pub mod remodel;
pub mod seed;
pub mod tasks;

pub mod capabilities;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod oracle;
pub mod pipelines;
pub mod recovery;
pub mod report;
pub mod sandbox;
pub mod shared;

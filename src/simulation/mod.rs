// In-process broker used for paper trading and tests

pub mod paper_broker;

pub use paper_broker::PaperBroker;

pub mod db;
pub mod identity;
pub mod ledger;
pub mod ledger_mock;
pub mod notifier;
pub mod notifier_mock;

// Block and transaction resolution over the collaborator chain.

pub mod block;
pub mod transaction;

pub use block::{BlockResolver, RetryPolicy};
pub use transaction::TransactionResolver;

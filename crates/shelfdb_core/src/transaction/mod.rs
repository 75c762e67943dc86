//! Transaction views over one snapshot.

mod pending;
mod read;
mod write;

pub(crate) use pending::{PendingWrites, WriteOp};
pub use read::ReadTransaction;
pub use write::ReadWriteTransaction;

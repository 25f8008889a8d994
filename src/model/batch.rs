use crate::model::log::LogRecord;
use serde::{Deserialize, Serialize};

/// An ordered set of records checked out of the store under one batch id.
///
/// A batch is the unit of delivery: it is sent with at most one auth
/// token and acknowledged (or abandoned) as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    /// Store-assigned checkout id, unique per store instance.
    pub batch_id: String,

    /// Group the records were staged under.
    pub group_id: String,

    /// Records in timestamp order.
    pub logs: Vec<LogRecord>,
}

impl LogBatch {
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

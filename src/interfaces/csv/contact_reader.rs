use crate::domain::ids::UserId;
use crate::domain::ports::Contact;
use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct ContactRecord {
    user_id: String,
    email: String,
    #[serde(default)]
    name: Option<String>,
}

/// Reads customer contacts from a CSV source with the header `user_id,email,name`.
pub struct ContactReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ContactReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn contacts(self) -> impl Iterator<Item = Result<(UserId, Contact)>> {
        self.reader.into_deserialize().map(|result| {
            let record: ContactRecord = result.map_err(EngineError::from)?;
            if record.user_id.is_empty() || !record.email.contains('@') {
                return Err(EngineError::ValidationError(format!(
                    "invalid contact row for user '{}'",
                    record.user_id
                )));
            }
            Ok((
                UserId::new(record.user_id),
                Contact {
                    email: record.email,
                    name: record.name.filter(|name| !name.is_empty()),
                },
            ))
        })
    }
}

use cbi_core::StoreError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TestFault {
    #[default]
    None,
    Connection,
    Query,
}

impl TestFault {
    pub fn error(&self, context: &str) -> Option<StoreError> {
        match self {
            TestFault::None => None,
            TestFault::Connection => Some(StoreError::connection(format!(
                "fault injection: connection lost during {context}"
            ))),
            TestFault::Query => Some(StoreError::query(format!(
                "fault injection: {context} failed"
            ))),
        }
    }

    pub fn check(&self, context: &str) -> Result<(), StoreError> {
        match self.error(context) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

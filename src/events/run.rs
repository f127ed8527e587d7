#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Started,
    Succeeded,
    /// at least one node failed; carries the failed node ids
    Failed(Vec<String>),
    Canceled,
}

impl RunEvent {
    pub fn str(&self) -> &str {
        match self {
            RunEvent::Started => "Running",
            RunEvent::Succeeded => "Succeeded",
            RunEvent::Failed(_) => "Failed",
            RunEvent::Canceled => "Canceled",
        }
    }
}

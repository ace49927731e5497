use crate::types::{PlayMode, SessionTopology};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionContext {
    pub topology: SessionTopology,
    pub connected_participants: usize,
}

/// Solo only for a local session with exactly one connected participant.
pub fn detect(context: SessionContext) -> PlayMode {
    match context.topology {
        SessionTopology::Dedicated => PlayMode::Group,
        SessionTopology::Local if context.connected_participants == 1 => PlayMode::Solo,
        SessionTopology::Local => PlayMode::Group,
    }
}

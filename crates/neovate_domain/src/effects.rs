use crate::SessionId;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Effect {
    SaveAppState,

    RequestAssistantReply {
        session_id: SessionId,
        content: String,
    },
    RunCommand {
        session_id: SessionId,
        command: String,
    },
}

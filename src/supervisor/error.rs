//! Supervisor 전용 에러 타입

use super::state_machine::TransitionError;

#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Minecraft server already running")]
    AlreadyRunning,

    #[error("There is currently no minecraft server running")]
    NotRunning,

    #[error("Failed to launch minecraft server: {0}")]
    Launch(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

use tbot_gateway::OrderStatus;

// ---------------------------------------------------------------------------
// LifecycleError
// ---------------------------------------------------------------------------

/// The open order's status and the position do not form a known bot state.
///
/// **Callers MUST treat this as a halt signal.** It means the position was
/// mutated in a way the open/close pairing cannot explain (e.g. a close fill
/// larger than the open fill).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    UnsupportedStateCombination {
        open_status: Option<OrderStatus>,
        close_status: Option<OrderStatus>,
        position: i64,
    },
}

impl std::fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleError::UnsupportedStateCombination {
                open_status,
                close_status,
                position,
            } => write!(
                f,
                "unsupported state combination: open_status={}, close_status={}, position={position}",
                status_text(*open_status),
                status_text(*close_status),
            ),
        }
    }
}

impl std::error::Error for LifecycleError {}

fn status_text(s: Option<OrderStatus>) -> &'static str {
    s.map(|s| s.as_str()).unwrap_or("unset")
}

// ---------------------------------------------------------------------------
// BotError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotError {
    /// `start` before `init`.
    NotInitialized { bot: String },
    AlreadyStarted { bot: String },
    WorkerSpawn { bot: String, reason: String },
}

impl std::fmt::Display for BotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotError::NotInitialized { bot } => write!(f, "bot {bot}: start before init"),
            BotError::AlreadyStarted { bot } => write!(f, "bot {bot}: already started"),
            BotError::WorkerSpawn { bot, reason } => {
                write!(f, "bot {bot}: worker thread spawn failed: {reason}")
            }
        }
    }
}

impl std::error::Error for BotError {}

use std::collections::HashMap;

/// Whether a webhook delivery is a real vote or a test sent from the
/// listing's settings page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteKind {
    Upvote,
    Test,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotVote {
    pub voter_id: String,
    pub bot_id: String,
    pub kind: VoteKind,
    pub is_weekend: bool,
    pub query: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVote {
    pub voter_id: String,
    pub server_id: String,
    pub kind: VoteKind,
    pub is_weekend: bool,
    pub query: HashMap<String, String>,
}

/// A vote notification pushed by Top.gg, parsed once per inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteEvent {
    Bot(BotVote),
    Server(ServerVote),
}

impl VoteEvent {
    pub fn voter_id(&self) -> &str {
        match self {
            VoteEvent::Bot(vote) => &vote.voter_id,
            VoteEvent::Server(vote) => &vote.voter_id,
        }
    }

    /// Id of the bot or server that received the vote.
    pub fn receiver_id(&self) -> &str {
        match self {
            VoteEvent::Bot(vote) => &vote.bot_id,
            VoteEvent::Server(vote) => &vote.server_id,
        }
    }

    pub fn kind(&self) -> VoteKind {
        match self {
            VoteEvent::Bot(vote) => vote.kind,
            VoteEvent::Server(vote) => vote.kind,
        }
    }

    pub fn is_test(&self) -> bool {
        self.kind() == VoteKind::Test
    }

    /// During weekends a single vote counts as two.
    pub fn is_weekend(&self) -> bool {
        match self {
            VoteEvent::Bot(vote) => vote.is_weekend,
            VoteEvent::Server(vote) => vote.is_weekend,
        }
    }

    pub fn query(&self) -> &HashMap<String, String> {
        match self {
            VoteEvent::Bot(vote) => &vote.query,
            VoteEvent::Server(vote) => &vote.query,
        }
    }
}
